#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial filters, joins and nearest-feature resolution.
//!
//! Both inputs of every operation must share one CRS. The right-hand side
//! is loaded into an R-tree for a bounding-box prefilter, and candidate
//! pairs are then confirmed with an exact DE-9IM relation. Records with
//! invalid geometry are skipped and returned beside the result instead of
//! aborting the batch.

pub mod filter;
pub mod index;
pub mod join;
pub mod nearest;

use std::collections::BTreeMap;

use geo::{Validation as _, relate::IntersectionMatrix};
use hydro_map_feature_models::{
    AttrValue, Crs, CrsMismatch, CrsUnits, Feature, FailureKind, LinearUnit, RecordFailure,
    RecordRole,
};
use serde::{Deserialize, Serialize};

pub use filter::{FilterOutcome, filter_contained, filter_not_contained};
pub use index::BoundaryIndex;
pub use join::join;
pub use nearest::{NearestOutcome, nearest, nearest_join, within_distance};

/// Suffix appended to right-hand attribute names that collide with a
/// left-hand attribute.
pub const RIGHT_SUFFIX: &str = "_right";

/// Errors that abort a whole spatial operation.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The two collections are in different CRSs.
    #[error(transparent)]
    CrsMismatch(#[from] CrsMismatch),

    /// Distances were requested in a geographic (degree-based) CRS.
    #[error("Distance in {crs} would be measured in degrees; reproject to a projected CRS first")]
    NonProjectedCrs {
        /// The angular CRS.
        crs: Crs,
    },

    /// The linear unit of the CRS could not be determined.
    #[error("Cannot determine the linear unit of {crs}")]
    UnknownUnits {
        /// The unclassified CRS.
        crs: Crs,
    },

    /// A distance threshold was negative or not a number.
    #[error("Invalid distance threshold: {0}")]
    InvalidDistance(f64),
}

/// Relation a left/subject geometry must have with a right/boundary
/// geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialPredicate {
    /// Left lies in the interior of right. Points on the boundary do not
    /// match.
    #[default]
    Within,
    /// Left and right share at least one point.
    Intersects,
    /// Left contains right.
    Contains,
}

impl SpatialPredicate {
    /// Evaluates the predicate on `left.relate(right)`.
    #[must_use]
    pub fn evaluate(self, matrix: &IntersectionMatrix) -> bool {
        match self {
            Self::Within => matrix.is_within(),
            Self::Intersects => matrix.is_intersects(),
            Self::Contains => matrix.is_contains(),
        }
    }
}

/// Validates a record's geometry.
///
/// # Errors
///
/// Returns an [`FailureKind::InvalidGeometry`] failure if the geometry has
/// non-finite coordinates, unclosed or self-intersecting rings, or other
/// structural defects.
pub fn check_geometry(
    feature: &Feature,
    index: usize,
    role: RecordRole,
) -> Result<(), RecordFailure> {
    if feature.geometry.is_valid() {
        Ok(())
    } else {
        Err(RecordFailure {
            role,
            index,
            id: feature.id.clone(),
            kind: FailureKind::InvalidGeometry,
            message: "geometry failed validation".to_string(),
        })
    }
}

/// Resolves the linear unit of a CRS used for distance computations.
///
/// # Errors
///
/// Returns [`SpatialError::NonProjectedCrs`] for geographic CRSs and
/// [`SpatialError::UnknownUnits`] if the unit cannot be classified.
pub fn linear_unit(crs: &Crs) -> Result<LinearUnit, SpatialError> {
    match crs.units() {
        Some(CrsUnits::Linear(unit)) => Ok(unit),
        Some(CrsUnits::Angular) => Err(SpatialError::NonProjectedCrs { crs: crs.clone() }),
        None => Err(SpatialError::UnknownUnits { crs: crs.clone() }),
    }
}

/// Merges right-hand attributes into a copy of the left-hand ones.
///
/// `right` is `None` for an unmatched left row, in which case every name in
/// `right_names` is set to [`AttrValue::Null`].
pub(crate) fn merge_attributes<'a>(
    left: &BTreeMap<String, AttrValue>,
    right: Option<&BTreeMap<String, AttrValue>>,
    right_names: impl IntoIterator<Item = &'a String>,
) -> BTreeMap<String, AttrValue> {
    let mut merged = left.clone();

    let right_key = |name: &str| {
        if left.contains_key(name) {
            format!("{name}{RIGHT_SUFFIX}")
        } else {
            name.to_string()
        }
    };

    match right {
        Some(attributes) => {
            for (name, value) in attributes {
                merged.insert(right_key(name), value.clone());
            }
        }
        None => {
            for name in right_names {
                merged.insert(right_key(name), AttrValue::Null);
            }
        }
    }

    merged
}
