//! Attribute transfer by spatial relation.

use hydro_map_feature_models::{
    Cardinality, Feature, FeatureCollection, JoinKind, JoinOptions, JoinPair, JoinResult,
    RecordRole,
};

use crate::{BoundaryIndex, SpatialError, SpatialPredicate, check_geometry, merge_attributes};

/// Joins `right` attributes onto `left` records where `predicate` holds.
///
/// Every match becomes its own row, in right-index order, so a point on a
/// shared boundary under [`SpatialPredicate::Intersects`] yields one row
/// per polygon. Rows keep the left geometry and id.
///
/// # Errors
///
/// Returns [`SpatialError::CrsMismatch`] if the collections do not share a
/// CRS.
pub fn join(
    left: &FeatureCollection,
    right: &FeatureCollection,
    predicate: SpatialPredicate,
    options: JoinOptions,
) -> Result<JoinResult, SpatialError> {
    left.ensure_same_crs(right)?;

    let index = BoundaryIndex::build(right, RecordRole::Right);
    let right_names = right.attribute_names();
    let mut failures = index.failures().to_vec();
    let mut collection = FeatureCollection::new(left.crs.clone());
    let mut pairs = Vec::new();

    for (i, feature) in left.iter().enumerate() {
        if let Err(failure) = check_geometry(feature, i, RecordRole::Left) {
            log::warn!("Skipping {failure}");
            failures.push(failure);
            continue;
        }

        let mut matches = index.matches(&feature.geometry, predicate);
        if options.cardinality == Cardinality::OneToOne {
            matches.truncate(1);
        }

        if matches.is_empty() {
            if options.kind == JoinKind::Left {
                collection.push(Feature {
                    id: feature.id.clone(),
                    geometry: feature.geometry.clone(),
                    attributes: merge_attributes(&feature.attributes, None, &right_names),
                });
                pairs.push(JoinPair {
                    left: i,
                    right: None,
                });
            }
            continue;
        }

        for r in matches {
            collection.push(Feature {
                id: feature.id.clone(),
                geometry: feature.geometry.clone(),
                attributes: merge_attributes(
                    &feature.attributes,
                    Some(&right.features[r].attributes),
                    &right_names,
                ),
            });
            pairs.push(JoinPair {
                left: i,
                right: Some(r),
            });
        }
    }

    log::info!(
        "Join ({predicate:?}, {:?}/{:?}): {} left x {} right -> {} rows, {} failures",
        options.kind,
        options.cardinality,
        left.len(),
        right.len(),
        pairs.len(),
        failures.len()
    );

    Ok(JoinResult {
        collection,
        pairs,
        options,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use geo::polygon;
    use super::*;
    use crate::filter_not_contained;
    use hydro_map_feature_models::{AttrValue, Crs};

    fn counties() -> FeatureCollection {
        FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![
                Feature::new(
                    "P1",
                    geo::polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
                )
                .with_attribute("county", "Montgomery"),
                Feature::new(
                    "P2",
                    geo::polygon![(x: 10.0, y: 0.0), (x: 20.0, y: 0.0), (x: 20.0, y: 10.0), (x: 10.0, y: 10.0)],
                )
                .with_attribute("county", "Prince George's"),
            ],
        )
    }

    fn gauges() -> FeatureCollection {
        FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![
                Feature::new("a", geo::point!(x: 5.0, y: 5.0)).with_attribute("county", "?"),
                Feature::new("b", geo::point!(x: 15.0, y: 5.0)),
                Feature::new("c", geo::point!(x: 50.0, y: 50.0)),
            ],
        )
    }

    #[test]
    fn inner_join_and_complement_filter() {
        let joined = join(&gauges(), &counties(), SpatialPredicate::Within, JoinOptions::inner())
            .unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(
            joined.pairs,
            vec![
                JoinPair { left: 0, right: Some(0) },
                JoinPair { left: 1, right: Some(1) },
            ]
        );

        let row_a = &joined.collection.features[0];
        assert_eq!(row_a.attribute("county"), Some(&AttrValue::from("?")));
        assert_eq!(row_a.attribute("county_right"), Some(&AttrValue::from("Montgomery")));

        let row_b = &joined.collection.features[1];
        assert_eq!(row_b.attribute("county"), Some(&AttrValue::from("Prince George's")));

        let outside = filter_not_contained(&gauges(), &counties(), SpatialPredicate::Within).unwrap();
        assert_eq!(outside.collection.len(), 1);
        assert_eq!(outside.collection.features[0].id, "c");
    }

    #[test]
    fn left_join_keeps_unmatched_with_nulls() {
        let joined =
            join(&gauges(), &counties(), SpatialPredicate::Within, JoinOptions::left()).unwrap();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.pairs[2], JoinPair { left: 2, right: None });
        assert_eq!(
            joined.collection.features[2].attribute("county"),
            Some(&AttrValue::Null)
        );
        assert_eq!(joined.options, JoinOptions::left());
    }

    #[test]
    fn shared_boundary_point_emits_one_row_per_match() {
        let edge = FeatureCollection::with_features(
            Crs::Epsg(5070),
            vec![Feature::new("edge", geo::point!(x: 10.0, y: 5.0))],
        );

        let many =
            join(&edge, &counties(), SpatialPredicate::Intersects, JoinOptions::inner()).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many.pairs[0].right, Some(0));
        assert_eq!(many.pairs[1].right, Some(1));

        let one = join(
            &edge,
            &counties(),
            SpatialPredicate::Intersects,
            JoinOptions::inner().with_cardinality(Cardinality::OneToOne),
        )
        .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one.pairs[0].right, Some(0));
    }

    #[test]
    fn contains_predicate_points_the_other_way() {
        let joined = join(&counties(), &gauges(), SpatialPredicate::Contains, JoinOptions::inner())
            .unwrap();
        let ids: Vec<&str> = joined.collection.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);
        assert_eq!(
            joined.collection.features[0].attribute("county_right"),
            Some(&AttrValue::from("?"))
        );
    }

    #[test]
    fn invalid_left_record_does_not_abort() {
        let mut left = gauges();
        left.push(Feature::new("nan", geo::point!(x: f64::NAN, y: 0.0)));
        let joined =
            join(&left, &counties(), SpatialPredicate::Within, JoinOptions::left()).unwrap();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.failures.len(), 1);
        assert_eq!(joined.failures[0].role, RecordRole::Left);
        assert_eq!(joined.failures[0].index, 3);
    }
}
