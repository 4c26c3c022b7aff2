#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Source definition types.
//!
//! Defines the TOML schema for point-table and boundary sources. Column
//! names are declared up front and checked once by [`PointTableConfig::validate`]
//! and again against the file header at load time, so a missing column is
//! reported before any geometry is built.

use std::path::PathBuf;

use hydro_map_feature_models::Crs;
use serde::{Deserialize, Serialize};

/// Errors from validating a source definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required field was empty.
    #[error("Source field '{field}' must not be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The same column was declared for two roles.
    #[error("Column '{column}' is used for more than one of id/x/y")]
    DuplicateColumn {
        /// The repeated column name.
        column: String,
    },

    /// The delimiter is not a single-byte character.
    #[error("Delimiter '{0}' must be a single ASCII character")]
    InvalidDelimiter(char),

    /// A source listed no input files.
    #[error("Point source '{0}' lists no files")]
    NoFiles(String),
}

/// How to read a delimited point table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointTableConfig {
    /// Column holding the record identifier.
    pub id_column: String,
    /// Column holding the x (longitude/easting) coordinate.
    pub x_column: String,
    /// Column holding the y (latitude/northing) coordinate.
    pub y_column: String,
    /// CRS the coordinates are expressed in.
    pub crs: Crs,
    /// Field delimiter (default: comma).
    #[serde(default)]
    pub delimiter: Option<char>,
    /// If set, each record stores the stem of its input file in this
    /// attribute (e.g. `"region"` for per-region files).
    #[serde(default)]
    pub source_column: Option<String>,
}

impl PointTableConfig {
    /// Checks that column names are present and distinct.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("id_column", &self.id_column),
            ("x_column", &self.x_column),
            ("y_column", &self.y_column),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField { field });
            }
        }

        if self.x_column == self.y_column || self.id_column == self.x_column {
            return Err(ConfigError::DuplicateColumn {
                column: self.x_column.clone(),
            });
        }
        if self.id_column == self.y_column {
            return Err(ConfigError::DuplicateColumn {
                column: self.y_column.clone(),
            });
        }

        if let Some(column) = &self.source_column
            && column.trim().is_empty()
        {
            return Err(ConfigError::EmptyField {
                field: "source_column",
            });
        }

        if let Some(d) = self.delimiter
            && !d.is_ascii()
        {
            return Err(ConfigError::InvalidDelimiter(d));
        }

        Ok(())
    }

    /// The delimiter as a byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.map_or(b',', |c| c as u8)
    }
}

/// How to read a polygon boundary file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Attribute used as the feature id (default: `GeoJSON` feature id,
    /// then the ordinal).
    #[serde(default)]
    pub id_field: Option<String>,
    /// CRS override for files without CRS metadata.
    #[serde(default)]
    pub crs: Option<Crs>,
}

/// A named set of point tables sharing one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSource {
    /// Layer name (e.g. `"stations"`).
    pub name: String,
    /// Input files, read in order.
    pub files: Vec<PathBuf>,
    /// Column mapping.
    #[serde(flatten)]
    pub table: PointTableConfig,
}

impl PointSource {
    /// Validates the file list and column mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if no files are listed or the mapping is
    /// invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "name" });
        }
        if self.files.is_empty() {
            return Err(ConfigError::NoFiles(self.name.clone()));
        }
        self.table.validate()
    }
}

/// A named polygon boundary file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundarySource {
    /// Layer name (e.g. `"counties"`).
    pub name: String,
    /// Path to a `.geojson`, `.json`, or `.shp` file.
    pub path: PathBuf,
    /// Id and CRS options.
    #[serde(flatten)]
    pub options: BoundaryConfig,
}
