//! Nearest-feature resolution and distance-threshold joins.

use std::collections::BTreeMap;

use geo::{Geometry, Point};
use hydro_map_feature_models::{
    AttrValue, Cardinality, DistanceMeasurement, FailureKind, Feature, FeatureCollection,
    JoinOptions, JoinPair, JoinResult, LinearUnit, RecordFailure, RecordRole,
};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{SpatialError, check_geometry, linear_unit, merge_attributes};

/// Attribute holding the distance on distance-join rows.
pub const DISTANCE_ATTRIBUTE: &str = "distance";
/// Attribute holding the matched candidate id on nearest-join rows.
pub const NEAREST_ID_ATTRIBUTE: &str = "nearest_id";

type CandidatePoint = GeomWithData<[f64; 2], usize>;

/// One measurement per resolved query, plus skipped records.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestOutcome {
    /// Measurements in query order.
    pub measurements: Vec<DistanceMeasurement>,
    /// Non-point or invalid query and candidate records.
    pub failures: Vec<RecordFailure>,
}

struct Prepared {
    unit: LinearUnit,
    tree: RTree<CandidatePoint>,
    queries: Vec<(usize, [f64; 2])>,
    failures: Vec<RecordFailure>,
}

fn point_of(feature: &Feature, index: usize, role: RecordRole) -> Result<[f64; 2], RecordFailure> {
    check_geometry(feature, index, role)?;
    match feature.geometry {
        Geometry::Point(Point(c)) => Ok([c.x, c.y]),
        _ => Err(RecordFailure {
            role,
            index,
            id: feature.id.clone(),
            kind: FailureKind::InvalidGeometry,
            message: format!("expected a point, found {}", feature.kind().as_str()),
        }),
    }
}

fn prepare(
    query: &FeatureCollection,
    candidates: &FeatureCollection,
) -> Result<Prepared, SpatialError> {
    query.ensure_same_crs(candidates)?;
    let unit = linear_unit(&query.crs)?;

    let mut failures = Vec::new();

    let mut points = Vec::with_capacity(candidates.len());
    for (i, feature) in candidates.iter().enumerate() {
        match point_of(feature, i, RecordRole::Candidate) {
            Ok(p) => points.push(CandidatePoint::new(p, i)),
            Err(failure) => {
                log::warn!("Skipping {failure}");
                failures.push(failure);
            }
        }
    }

    let mut queries = Vec::with_capacity(query.len());
    for (i, feature) in query.iter().enumerate() {
        match point_of(feature, i, RecordRole::Query) {
            Ok(p) => queries.push((i, p)),
            Err(failure) => {
                log::warn!("Skipping {failure}");
                failures.push(failure);
            }
        }
    }

    Ok(Prepared {
        unit,
        tree: RTree::bulk_load(points),
        queries,
        failures,
    })
}

/// Returns the nearest candidate to `point` and its squared distance.
/// Exactly equal distances resolve to the lowest candidate index.
fn nearest_in(tree: &RTree<CandidatePoint>, point: [f64; 2]) -> Option<(usize, f64)> {
    let mut iter = tree.nearest_neighbor_iter_with_distance_2(&point);
    let (first, best_d2) = iter.next()?;
    let mut best = first.data;

    for (candidate, d2) in iter {
        if d2 > best_d2 {
            break;
        }
        best = best.min(candidate.data);
    }

    Some((best, best_d2))
}

/// Candidate attributes plus computed pair attributes, which replace
/// candidate attributes of the same name. The result is merged as the
/// right side, so a left attribute keeps its name and the computed value
/// gets the `_right` suffix.
fn with_computed<const N: usize>(
    candidate: &BTreeMap<String, AttrValue>,
    computed: [(&str, AttrValue); N],
) -> BTreeMap<String, AttrValue> {
    let mut right = candidate.clone();
    for (name, value) in computed {
        right.insert(name.to_string(), value);
    }
    right
}

fn measurement(
    query: &FeatureCollection,
    candidates: &FeatureCollection,
    query_index: usize,
    candidate_index: usize,
    distance: f64,
    unit: LinearUnit,
) -> DistanceMeasurement {
    DistanceMeasurement {
        query_id: query.features[query_index].id.clone(),
        candidate_id: candidates.features[candidate_index].id.clone(),
        query_index,
        candidate_index,
        distance,
        unit,
    }
}

/// Resolves each point query to its single nearest candidate point.
///
/// Distances are Euclidean in the shared CRS's linear unit. With an empty
/// (or entirely invalid) candidate set no measurements are produced.
///
/// # Errors
///
/// Returns [`SpatialError::CrsMismatch`] if the collections differ in CRS,
/// [`SpatialError::NonProjectedCrs`] if the CRS is geographic, and
/// [`SpatialError::UnknownUnits`] if its unit is unknown.
pub fn nearest(
    query: &FeatureCollection,
    candidates: &FeatureCollection,
) -> Result<NearestOutcome, SpatialError> {
    let prepared = prepare(query, candidates)?;

    let measurements: Vec<DistanceMeasurement> = prepared
        .queries
        .iter()
        .filter_map(|&(qi, point)| {
            let (ci, d2) = nearest_in(&prepared.tree, point)?;
            Some(measurement(query, candidates, qi, ci, d2.sqrt(), prepared.unit))
        })
        .collect();

    log::info!(
        "Nearest: resolved {} of {} queries against {} candidates ({})",
        measurements.len(),
        query.len(),
        prepared.tree.size(),
        prepared.unit.symbol()
    );

    Ok(NearestOutcome {
        measurements,
        failures: prepared.failures,
    })
}

/// Pairs every query point with every candidate within `max_distance`
/// (inclusive, in the CRS unit). This is one-to-many; a query may match
/// zero or several candidates. Rows are ordered by query, then candidate
/// index, and carry a `distance` attribute.
///
/// # Errors
///
/// As [`nearest`], plus [`SpatialError::InvalidDistance`] for a negative or
/// NaN threshold.
pub fn within_distance(
    query: &FeatureCollection,
    candidates: &FeatureCollection,
    max_distance: f64,
) -> Result<JoinResult, SpatialError> {
    if max_distance.is_nan() || max_distance < 0.0 {
        return Err(SpatialError::InvalidDistance(max_distance));
    }

    let prepared = prepare(query, candidates)?;
    let right_names = candidates.attribute_names();

    let mut collection = FeatureCollection::new(query.crs.clone());
    let mut pairs = Vec::new();

    for &(qi, point) in &prepared.queries {
        let mut hits: Vec<(usize, f64)> = prepared
            .tree
            .nearest_neighbor_iter_with_distance_2(&point)
            .map(|(c, d2)| (c.data, d2.sqrt()))
            .take_while(|&(_, distance)| distance <= max_distance)
            .collect();
        hits.sort_unstable_by_key(|&(ci, _)| ci);

        let left = &query.features[qi];
        for (ci, distance) in hits {
            let attributes = merge_attributes(
                &left.attributes,
                Some(&with_computed(
                    &candidates.features[ci].attributes,
                    [(DISTANCE_ATTRIBUTE, AttrValue::Float(distance))],
                )),
                &right_names,
            );

            collection.push(Feature {
                id: left.id.clone(),
                geometry: left.geometry.clone(),
                attributes,
            });
            pairs.push(JoinPair {
                left: qi,
                right: Some(ci),
            });
        }
    }

    log::info!(
        "Within {max_distance} {}: {} pairs from {} queries",
        prepared.unit.symbol(),
        pairs.len(),
        query.len()
    );

    Ok(JoinResult {
        collection,
        pairs,
        options: JoinOptions::inner(),
        failures: prepared.failures,
    })
}

/// Attaches the nearest candidate's attributes to each query record, plus
/// `nearest_id` and `distance`. Like candidate attributes, these take the
/// `_right` suffix when the query record already has that name.
///
/// # Errors
///
/// See [`nearest`].
pub fn nearest_join(
    query: &FeatureCollection,
    candidates: &FeatureCollection,
) -> Result<JoinResult, SpatialError> {
    let outcome = nearest(query, candidates)?;
    let right_names = candidates.attribute_names();

    let mut collection = FeatureCollection::new(query.crs.clone());
    let mut pairs = Vec::with_capacity(outcome.measurements.len());

    for m in &outcome.measurements {
        let left = &query.features[m.query_index];
        let attributes = merge_attributes(
            &left.attributes,
            Some(&with_computed(
                &candidates.features[m.candidate_index].attributes,
                [
                    (NEAREST_ID_ATTRIBUTE, AttrValue::Text(m.candidate_id.clone())),
                    (DISTANCE_ATTRIBUTE, AttrValue::Float(m.distance)),
                ],
            )),
            &right_names,
        );

        collection.push(Feature {
            id: left.id.clone(),
            geometry: left.geometry.clone(),
            attributes,
        });
        pairs.push(JoinPair {
            left: m.query_index,
            right: Some(m.candidate_index),
        });
    }

    Ok(JoinResult {
        collection,
        pairs,
        options: JoinOptions::inner().with_cardinality(Cardinality::OneToOne),
        failures: outcome.failures,
    })
}
