#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature, collection, and CRS types shared by every pipeline stage.
//!
//! A [`FeatureCollection`] is an ordered list of [`Feature`]s that all
//! share one [`Crs`], stored once on the collection. Operations that
//! compare two collections must check [`FeatureCollection::ensure_same_crs`]
//! before touching coordinates.

pub mod crs;
pub mod result;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use geo::Geometry;
use serde::{Deserialize, Serialize};

pub use crs::{Crs, CrsParseError, CrsUnits, LinearUnit};
pub use result::{
    Cardinality, DistanceMeasurement, FailureKind, JoinKind, JoinOptions, JoinPair, JoinResult,
    RecordFailure, RecordRole,
};

/// A single attribute value attached to a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Missing value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl AttrValue {
    /// Infers a typed value from a raw delimited-text cell.
    ///
    /// Empty cells and `NA` become [`AttrValue::Null`]. Digit strings with
    /// a leading zero (station codes like `"01646500"`) stay text so the
    /// zero is not lost.
    #[must_use]
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed == "NA" {
            return Self::Null;
        }

        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }

        let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
        if unsigned.len() > 1 && unsigned.starts_with('0') && !unsigned.starts_with("0.") {
            return Self::Text(trimmed.to_string());
        }

        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Self::Float(f);
        }

        Self::Text(trimmed.to_string())
    }

    /// Returns `true` for [`AttrValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the text if this is a [`AttrValue::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a numeric view of integer and float values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Renders the value as a grouping key. `Null` has no key.
    #[must_use]
    pub fn to_key_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| n.as_f64().map_or(Self::Null, Self::Float), Self::Int),
            serde_json::Value::String(s) => Self::Text(s),
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::Text(other.to_string())
            }
        }
    }
}

impl From<&AttrValue> for serde_json::Value {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Null => Self::Null,
            AttrValue::Bool(b) => Self::Bool(*b),
            AttrValue::Int(i) => Self::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number),
            AttrValue::Text(s) => Self::String(s.clone()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Broad geometry class, used for draw order and layer catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeometryKind {
    /// Areal geometries.
    Polygon,
    /// Linear geometries.
    Line,
    /// Point geometries.
    Point,
    /// Heterogeneous geometry collections.
    Collection,
}

impl GeometryKind {
    /// Classifies a geometry.
    #[must_use]
    pub const fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Self::Point,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Self::Line
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Self::Polygon,
            Geometry::GeometryCollection(_) => Self::Collection,
        }
    }

    /// Lowercase name used in catalogs and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Line => "line",
            Self::Point => "point",
            Self::Collection => "collection",
        }
    }
}

/// A geometry with an identifier and named attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Record identifier (station id, polygon id, or ordinal).
    pub id: String,
    /// Geometry in the owning collection's CRS.
    pub geometry: Geometry<f64>,
    /// Attribute name to value.
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Feature {
    /// Creates a feature with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: id.into(),
            geometry: geometry.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Returns the broad geometry class.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        GeometryKind::of(&self.geometry)
    }
}

/// Two collections were compared without sharing a CRS.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CRS mismatch: {left} vs {right} (harmonize before comparing)")]
pub struct CrsMismatch {
    /// CRS of the left-hand collection.
    pub left: Crs,
    /// CRS of the right-hand collection.
    pub right: Crs,
}

/// An ordered sequence of features sharing one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    /// CRS of every feature in the collection.
    pub crs: Crs,
    /// Features in source order.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new(crs: Crs) -> Self {
        Self {
            crs,
            features: Vec::new(),
        }
    }

    /// Creates a collection from existing features.
    #[must_use]
    pub const fn with_features(crs: Crs, features: Vec<Feature>) -> Self {
        Self { crs, features }
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns `true` if the collection has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Iterates features in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    /// Appends a feature.
    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Union of attribute names across all features.
    #[must_use]
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.features
            .iter()
            .flat_map(|f| f.attributes.keys().cloned())
            .collect()
    }

    /// Distinct geometry classes present, in draw order.
    #[must_use]
    pub fn kinds(&self) -> BTreeSet<GeometryKind> {
        self.features.iter().map(Feature::kind).collect()
    }

    /// Verifies that `other` shares this collection's CRS.
    ///
    /// # Errors
    ///
    /// Returns [`CrsMismatch`] if the identifiers differ.
    pub fn ensure_same_crs(&self, other: &Self) -> Result<(), CrsMismatch> {
        if self.crs == other.crs {
            Ok(())
        } else {
            Err(CrsMismatch {
                left: self.crs.clone(),
                right: other.crs.clone(),
            })
        }
    }
}

impl<'a> IntoIterator for &'a FeatureCollection {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}
