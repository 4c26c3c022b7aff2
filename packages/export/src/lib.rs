#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Multi-layer container export.
//!
//! A container is a single `DuckDB` file. Each layer is a table of
//! `(fid, id, geometry, properties)` rows with the geometry stored as
//! `GeoJSON` TEXT and the attributes as a JSON object, and the
//! `layer_catalog` table records the CRS, feature count and geometry kinds
//! of every layer. Writing a layer that already exists replaces it inside
//! one transaction, so readers see either the old layer or the new one.

mod container;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use hydro_map_feature_models::{CrsParseError, FeatureCollection};

pub use container::{export_layers, list_layers, read_layer};

/// Name of the catalog table inside every container.
pub const CATALOG_TABLE: &str = "layer_catalog";

/// Group that collects features whose grouping attribute is missing or
/// null.
pub const UNGROUPED: &str = "ungrouped";

/// Errors from writing or reading a container.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A layer could not be written; the previous content of the layer,
    /// if any, is unchanged.
    #[error("Failed to write layer '{layer}': {source}")]
    Write {
        layer: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Invalid layer name '{name}'")]
    InvalidLayerName { name: String },

    /// Table names are case-insensitive, so `name` would overwrite the
    /// table of `existing`.
    #[error("Layer '{name}' collides with layer '{existing}'")]
    LayerNameCollision { name: String, existing: String },

    #[error("Container not found: {}", path.display())]
    ContainerNotFound { path: PathBuf },

    #[error("Layer '{name}' not found in container")]
    LayerNotFound { name: String },

    #[error("Layer '{layer}' feature {fid}: {message}")]
    Geometry {
        layer: String,
        fid: i64,
        message: String,
    },

    #[error(transparent)]
    Crs(#[from] CrsParseError),

    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A named subset of features destined for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGroup {
    pub name: String,
    pub collection: FeatureCollection,
}

impl LayerGroup {
    #[must_use]
    pub fn new(name: impl Into<String>, collection: FeatureCollection) -> Self {
        Self {
            name: name.into(),
            collection,
        }
    }
}

/// Catalog entry for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub crs: String,
    pub feature_count: u64,
    /// Geometry kinds present, e.g. `["point"]` or `["polygon", "line"]`.
    pub geometry_types: Vec<String>,
    pub written_at: String,
}

/// A layer that was not written.
#[derive(Debug)]
pub struct LayerFailure {
    pub layer: String,
    pub error: ExportError,
}

impl fmt::Display for LayerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.layer, self.error)
    }
}

/// Outcome of [`export_layers`].
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Layers written, with their feature counts, in input order.
    pub written: Vec<(String, u64)>,
    pub failures: Vec<LayerFailure>,
}

impl ExportReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Splits a collection into one group per distinct value of `attribute`.
///
/// Groups are ordered by name and keep source order within each group.
/// Features without a value for `attribute` form a separate trailing
/// [`UNGROUPED`] group, even when some feature's value is literally
/// `"ungrouped"`; [`export_layers`] refuses the second of two such names.
#[must_use]
pub fn group_by(collection: &FeatureCollection, attribute: &str) -> Vec<LayerGroup> {
    let mut groups: BTreeMap<String, FeatureCollection> = BTreeMap::new();
    let mut ungrouped = FeatureCollection::new(collection.crs.clone());

    for feature in collection.iter() {
        match feature
            .attribute(attribute)
            .and_then(hydro_map_feature_models::AttrValue::to_key_string)
        {
            Some(key) => groups
                .entry(key)
                .or_insert_with(|| FeatureCollection::new(collection.crs.clone()))
                .push(feature.clone()),
            None => ungrouped.push(feature.clone()),
        }
    }

    if !ungrouped.is_empty() {
        log::warn!(
            "{} feature(s) have no '{attribute}' value; grouped as '{UNGROUPED}'",
            ungrouped.len()
        );
    }

    let mut named: Vec<LayerGroup> = groups
        .into_iter()
        .map(|(name, collection)| LayerGroup { name, collection })
        .collect();
    if !ungrouped.is_empty() {
        named.push(LayerGroup::new(UNGROUPED, ungrouped));
    }
    named
}
