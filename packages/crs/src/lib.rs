#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CRS harmonization.
//!
//! Re-expresses every geometry of a [`FeatureCollection`] in a target CRS
//! using PROJ. Collections already in the target CRS are returned as-is so
//! harmonizing twice never moves a coordinate.

use geo::{Coord, Geometry, MapCoords as _};
use hydro_map_feature_models::{Crs, FeatureCollection};
use proj::Proj;
use thiserror::Error;

/// Errors that can occur while reprojecting.
#[derive(Debug, Error)]
pub enum CrsError {
    /// PROJ could not build a transformation between the two identifiers.
    #[error("Unknown CRS: cannot transform {from} -> {to}: {message}")]
    UnknownCrs {
        /// Source CRS.
        from: Crs,
        /// Target CRS.
        to: Crs,
        /// PROJ's description of the failure.
        message: String,
    },

    /// A coordinate could not be projected.
    #[error("Failed to transform feature {id} from {from} to {to}: {message}")]
    Transform {
        /// Identifier of the offending feature.
        id: String,
        /// Source CRS.
        from: Crs,
        /// Target CRS.
        to: Crs,
        /// Description of what went wrong.
        message: String,
    },
}

/// A reusable coordinate transformation between two CRSs.
pub struct Transformer {
    proj: Proj,
    from: Crs,
    to: Crs,
}

impl Transformer {
    /// Builds a transformation. Axis order is normalized to x = longitude
    /// (or easting), y = latitude (or northing).
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::UnknownCrs`] if PROJ does not recognize either
    /// identifier.
    pub fn new(from: &Crs, to: &Crs) -> Result<Self, CrsError> {
        let proj = Proj::new_known_crs(&from.proj_identifier(), &to.proj_identifier(), None)
            .map_err(|e| CrsError::UnknownCrs {
                from: from.clone(),
                to: to.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            proj,
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Transforms a single coordinate.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if PROJ rejects the coordinate
    /// or produces a non-finite result.
    pub fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, String> {
        let (x, y) = self
            .proj
            .convert((coord.x, coord.y))
            .map_err(|e| e.to_string())?;

        if !x.is_finite() || !y.is_finite() {
            return Err(format!(
                "({}, {}) is outside the domain of the transformation",
                coord.x, coord.y
            ));
        }

        Ok(Coord { x, y })
    }

    /// Transforms every coordinate of a geometry.
    ///
    /// # Errors
    ///
    /// Returns a description of the first coordinate that fails.
    pub fn transform_geometry(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>, String> {
        geometry.try_map_coords(|c| self.transform_coord(c))
    }

    /// Source CRS.
    #[must_use]
    pub const fn source(&self) -> &Crs {
        &self.from
    }

    /// Target CRS.
    #[must_use]
    pub const fn target(&self) -> &Crs {
        &self.to
    }
}

/// Re-expresses a collection in `target`.
///
/// Feature count, order, ids and attributes are unchanged; only
/// coordinates move. If the collection is already in `target` it is
/// returned untouched.
///
/// # Errors
///
/// Returns [`CrsError::UnknownCrs`] if either CRS is unrecognized, or
/// [`CrsError::Transform`] if any coordinate cannot be projected.
pub fn harmonize(collection: FeatureCollection, target: &Crs) -> Result<FeatureCollection, CrsError> {
    if &collection.crs == target {
        log::debug!(
            "Collection of {} features already in {target}, skipping reprojection",
            collection.len()
        );
        return Ok(collection);
    }

    let transformer = Transformer::new(&collection.crs, target)?;
    let count = collection.len();

    let features = collection
        .features
        .into_iter()
        .map(|mut feature| {
            feature.geometry = transformer
                .transform_geometry(&feature.geometry)
                .map_err(|message| CrsError::Transform {
                    id: feature.id.clone(),
                    from: transformer.source().clone(),
                    to: target.clone(),
                    message,
                })?;
            Ok(feature)
        })
        .collect::<Result<Vec<_>, CrsError>>()?;

    log::info!(
        "Reprojected {count} features from {} to {target}",
        transformer.source()
    );

    Ok(FeatureCollection::with_features(target.clone(), features))
}

/// Harmonizes several collections into one target CRS, preserving order.
///
/// # Errors
///
/// Returns the first [`CrsError`] encountered.
pub fn harmonize_all(
    collections: Vec<FeatureCollection>,
    target: &Crs,
) -> Result<Vec<FeatureCollection>, CrsError> {
    collections
        .into_iter()
        .map(|c| harmonize(c, target))
        .collect()
}

/// Transforms a single `(x, y)` position between two CRSs.
///
/// # Errors
///
/// Returns [`CrsError`] if the CRSs are unknown or the position cannot be
/// projected.
pub fn transform_point(x: f64, y: f64, from: &Crs, to: &Crs) -> Result<(f64, f64), CrsError> {
    if from == to {
        return Ok((x, y));
    }

    let transformer = Transformer::new(from, to)?;
    let coord = transformer
        .transform_coord(Coord { x, y })
        .map_err(|message| CrsError::Transform {
            id: format!("({x}, {y})"),
            from: from.clone(),
            to: to.clone(),
            message,
        })?;

    Ok((coord.x, coord.y))
}
