//! R-tree over the right-hand (boundary) side of a filter or join.

use geo::{BoundingRect, Geometry, Relate};
use hydro_map_feature_models::{FeatureCollection, RecordFailure, RecordRole};
use rstar::{AABB, RTree, RTreeObject};

use crate::{SpatialPredicate, check_geometry};

/// A right-hand geometry stored in the R-tree with its position in the
/// source collection.
struct BoundaryEntry<'a> {
    index: usize,
    envelope: AABB<[f64; 2]>,
    geometry: &'a Geometry<f64>,
}

impl RTreeObject for BoundaryEntry<'_> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Bounding-box prefilter plus exact DE-9IM evaluation.
///
/// Invalid right-hand records are left out of the tree and reported once
/// through [`BoundaryIndex::failures`].
pub struct BoundaryIndex<'a> {
    tree: RTree<BoundaryEntry<'a>>,
    failures: Vec<RecordFailure>,
}

impl<'a> BoundaryIndex<'a> {
    /// Indexes every valid geometry of `collection`.
    #[must_use]
    pub fn build(collection: &'a FeatureCollection, role: RecordRole) -> Self {
        let mut entries = Vec::with_capacity(collection.len());
        let mut failures = Vec::new();

        for (index, feature) in collection.iter().enumerate() {
            if let Err(failure) = check_geometry(feature, index, role) {
                log::warn!("Skipping {failure}");
                failures.push(failure);
                continue;
            }

            // Empty geometries have no extent and can never match.
            let Some(envelope) = compute_envelope(&feature.geometry) else {
                log::debug!("{role} record #{index} ({}) is empty", feature.id);
                continue;
            };

            entries.push(BoundaryEntry {
                index,
                envelope,
                geometry: &feature.geometry,
            });
        }

        log::debug!(
            "Indexed {} of {} {role} geometries",
            entries.len(),
            collection.len()
        );

        Self {
            tree: RTree::bulk_load(entries),
            failures,
        }
    }

    /// Indices of every indexed geometry `geometry` relates to under
    /// `predicate`, ascending.
    #[must_use]
    pub fn matches(&self, geometry: &Geometry<f64>, predicate: SpatialPredicate) -> Vec<usize> {
        let Some(query_env) = compute_envelope(geometry) else {
            return Vec::new();
        };

        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| predicate.evaluate(&geometry.relate(entry.geometry)))
            .map(|entry| entry.index)
            .collect();

        hits.sort_unstable();
        hits
    }

    /// Right-hand records that failed validation.
    #[must_use]
    pub fn failures(&self) -> &[RecordFailure] {
        &self.failures
    }

    /// Number of indexed geometries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.tree.size()
    }
}

/// Computes the axis-aligned bounding box of a geometry, or `None` if it
/// is empty.
#[must_use]
pub fn compute_envelope(geometry: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    geometry
        .bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}
