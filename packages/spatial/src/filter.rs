//! Containment filters and their complement.

use hydro_map_feature_models::{FeatureCollection, RecordFailure, RecordRole};

use crate::{BoundaryIndex, SpatialError, SpatialPredicate, check_geometry};

/// Subject records kept by a filter, plus skipped records.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Kept records in subject order.
    pub collection: FeatureCollection,
    /// Subject index of each kept record.
    pub indices: Vec<usize>,
    /// Invalid subject and boundary records.
    pub failures: Vec<RecordFailure>,
}

/// Keeps subject records that relate to at least one boundary geometry.
///
/// # Errors
///
/// Returns [`SpatialError::CrsMismatch`] if the collections do not share a
/// CRS.
pub fn filter_contained(
    subject: &FeatureCollection,
    boundary: &FeatureCollection,
    predicate: SpatialPredicate,
) -> Result<FilterOutcome, SpatialError> {
    filter(subject, boundary, predicate, true)
}

/// Keeps subject records that relate to no boundary geometry.
///
/// Together with [`filter_contained`] this partitions the valid subject
/// records; invalid ones appear in neither output, only in `failures`.
///
/// # Errors
///
/// Returns [`SpatialError::CrsMismatch`] if the collections do not share a
/// CRS.
pub fn filter_not_contained(
    subject: &FeatureCollection,
    boundary: &FeatureCollection,
    predicate: SpatialPredicate,
) -> Result<FilterOutcome, SpatialError> {
    filter(subject, boundary, predicate, false)
}

fn filter(
    subject: &FeatureCollection,
    boundary: &FeatureCollection,
    predicate: SpatialPredicate,
    keep_matching: bool,
) -> Result<FilterOutcome, SpatialError> {
    subject.ensure_same_crs(boundary)?;

    let index = BoundaryIndex::build(boundary, RecordRole::Boundary);
    let mut failures = index.failures().to_vec();
    let mut collection = FeatureCollection::new(subject.crs.clone());
    let mut indices = Vec::new();

    for (i, feature) in subject.iter().enumerate() {
        if let Err(failure) = check_geometry(feature, i, RecordRole::Subject) {
            log::warn!("Skipping {failure}");
            failures.push(failure);
            continue;
        }

        let matched = !index.matches(&feature.geometry, predicate).is_empty();
        if matched == keep_matching {
            collection.push(feature.clone());
            indices.push(i);
        }
    }

    log::info!(
        "Filter ({predicate:?}, {}): kept {} of {} records, {} failures",
        if keep_matching { "contained" } else { "not contained" },
        collection.len(),
        subject.len(),
        failures.len()
    );

    Ok(FilterOutcome {
        collection,
        indices,
        failures,
    })
}
