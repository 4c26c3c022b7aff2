#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Source loading.
//!
//! Reads delimited point tables (possibly split across per-region files)
//! and polygon boundary files into [`FeatureCollection`]s tagged with
//! their CRS. Column presence is checked against the declared
//! configuration before any row is converted.

pub mod geojson_file;
pub mod points;
pub mod shapefile_file;

use std::path::{Path, PathBuf};

use hydro_map_feature_models::FeatureCollection;
use hydro_map_source_models::{BoundaryConfig, BoundarySource, ConfigError, PointSource};

pub use points::load_point_tables;

/// Errors that can occur while loading sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The input path does not exist or is not a file.
    #[error("Source not found: {}", path.display())]
    SourceNotFound {
        /// The path that failed to resolve.
        path: PathBuf,
    },

    /// Declared columns are absent from the file header.
    #[error("Schema mismatch in {}: missing column(s) {}", path.display(), missing.join(", "))]
    SchemaMismatch {
        /// File being read.
        path: PathBuf,
        /// Every declared column that was not found.
        missing: Vec<String>,
    },

    /// A required cell was empty.
    #[error("{}: line {line}: column '{column}' is empty", path.display())]
    MissingValue {
        /// File being read.
        path: PathBuf,
        /// 1-based line number (header is line 1).
        line: u64,
        /// Column that was empty.
        column: String,
    },

    /// Geometry could not be parsed or built.
    #[error("Malformed geometry in {}: {message}", path.display())]
    MalformedGeometry {
        /// File being read.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// The file has no CRS metadata and no override was configured.
    #[error("No CRS for {} (add a .prj file or set `crs` in the source definition)", path.display())]
    MissingCrs {
        /// File being read.
        path: PathBuf,
    },

    /// The file extension is not a supported vector format.
    #[error("Unsupported vector format: {}", path.display())]
    UnsupportedFormat {
        /// File being read.
        path: PathBuf,
    },

    /// The source definition is invalid.
    #[error("Invalid source definition: {0}")]
    Config(#[from] ConfigError),

    /// Delimited text could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub(crate) fn malformed(path: &Path, message: impl std::fmt::Display) -> Self {
        Self::MalformedGeometry {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// Loads a polygon boundary file, dispatching on its extension
/// (`.geojson`/`.json` or `.shp`).
///
/// # Errors
///
/// Returns [`SourceError::SourceNotFound`] if the path does not exist,
/// [`SourceError::UnsupportedFormat`] for other extensions, and
/// [`SourceError::MalformedGeometry`] if the file cannot be parsed.
pub fn load_boundaries(path: &Path, config: &BoundaryConfig) -> Result<FeatureCollection, SourceError> {
    if !path.is_file() {
        return Err(SourceError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let collection = match extension.as_str() {
        "geojson" | "json" => geojson_file::read(path, config)?,
        "shp" => shapefile_file::read(path, config)?,
        _ => {
            return Err(SourceError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }
    };

    log::info!(
        "Loaded {} boundaries from {} ({})",
        collection.len(),
        path.display(),
        collection.crs
    );

    Ok(collection)
}

/// Loads every file of a [`PointSource`].
///
/// # Errors
///
/// Returns [`SourceError`] if the definition is invalid or any file fails
/// to load.
pub fn load_point_source(source: &PointSource) -> Result<FeatureCollection, SourceError> {
    source.validate()?;
    load_point_tables(&source.files, &source.table)
}

/// Loads a [`BoundarySource`].
///
/// # Errors
///
/// See [`load_boundaries`].
pub fn load_boundary_source(source: &BoundarySource) -> Result<FeatureCollection, SourceError> {
    load_boundaries(&source.path, &source.options)
}
