//! Delimited point tables.

use std::collections::BTreeMap;
use std::path::Path;

use geo::Point;
use hydro_map_feature_models::{AttrValue, Feature, FeatureCollection};
use hydro_map_source_models::PointTableConfig;

use crate::SourceError;

/// Loads one or more point tables sharing one schema into a single
/// collection.
///
/// Files are read in the order given and rows keep their file order, so
/// the result is concatenation-stable. Every header cell becomes an
/// attribute with an inferred type; the id column is always kept as text.
///
/// # Errors
///
/// Returns [`SourceError::SourceNotFound`] if any path is missing,
/// [`SourceError::SchemaMismatch`] listing every declared column absent
/// from a file, and [`SourceError::MalformedGeometry`] if a coordinate
/// cell is not a finite number.
pub fn load_point_tables<P: AsRef<Path>>(
    paths: &[P],
    config: &PointTableConfig,
) -> Result<FeatureCollection, SourceError> {
    config.validate()?;

    // Fail on a missing file before reading anything.
    for path in paths {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SourceError::SourceNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let mut collection = FeatureCollection::new(config.crs.clone());

    for path in paths {
        let path = path.as_ref();
        let features = read_table(path, config)?;
        log::info!("Loaded {} points from {}", features.len(), path.display());
        collection.features.extend(features);
    }

    log::debug!(
        "Point tables: {} files, {} features total ({})",
        paths.len(),
        collection.len(),
        collection.crs
    );

    Ok(collection)
}

struct ColumnIndices {
    id: usize,
    x: usize,
    y: usize,
}

fn resolve_columns(
    path: &Path,
    headers: &csv::StringRecord,
    config: &PointTableConfig,
) -> Result<ColumnIndices, SourceError> {
    let position = |name: &str| headers.iter().position(|h| h == name);

    let id = position(&config.id_column);
    let x = position(&config.x_column);
    let y = position(&config.y_column);

    match (id, x, y) {
        (Some(id), Some(x), Some(y)) => Ok(ColumnIndices { id, x, y }),
        _ => {
            let missing = [
                (&config.id_column, id),
                (&config.x_column, x),
                (&config.y_column, y),
            ]
            .into_iter()
            .filter(|(_, idx)| idx.is_none())
            .map(|(name, _)| name.clone())
            .collect();

            Err(SourceError::SchemaMismatch {
                path: path.to_path_buf(),
                missing,
            })
        }
    }
}

fn read_table(path: &Path, config: &PointTableConfig) -> Result<Vec<Feature>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter_byte())
        .trim(csv::Trim::Headers)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let columns = resolve_columns(path, &headers, config)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut features = Vec::new();

    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, csv::Position::line);

        let id = record.get(columns.id).unwrap_or_default().trim();
        if id.is_empty() {
            return Err(SourceError::MissingValue {
                path: path.to_path_buf(),
                line,
                column: config.id_column.clone(),
            });
        }

        let x = parse_coordinate(path, line, &config.x_column, record.get(columns.x))?;
        let y = parse_coordinate(path, line, &config.y_column, record.get(columns.y))?;

        let mut attributes: BTreeMap<String, AttrValue> = headers
            .iter()
            .zip(record.iter())
            .map(|(name, cell)| (name.to_string(), AttrValue::infer(cell)))
            .collect();

        attributes.insert(config.id_column.clone(), AttrValue::Text(id.to_string()));

        if let Some(column) = &config.source_column {
            attributes.insert(column.clone(), AttrValue::Text(stem.clone()));
        }

        features.push(Feature {
            id: id.to_string(),
            geometry: Point::new(x, y).into(),
            attributes,
        });
    }

    Ok(features)
}

fn parse_coordinate(
    path: &Path,
    line: u64,
    column: &str,
    cell: Option<&str>,
) -> Result<f64, SourceError> {
    let raw = cell.unwrap_or_default().trim();

    if raw.is_empty() {
        return Err(SourceError::MissingValue {
            path: path.to_path_buf(),
            line,
            column: column.to_string(),
        });
    }

    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SourceError::malformed(
            path,
            format!("line {line}: column '{column}' is not a coordinate: '{raw}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;
    use geo::Geometry;
    use hydro_map_feature_models::Crs;

    fn config() -> PointTableConfig {
        PointTableConfig {
            id_column: "site_no".to_string(),
            x_column: "dec_long_va".to_string(),
            y_column: "dec_lat_va".to_string(),
            crs: Crs::Epsg(4269),
            delimiter: None,
            source_column: Some("region".to_string()),
        }
    }

    #[test]
    fn loads_and_concatenates_region_files() {
        let dir = scratch_dir("concat");
        let va = dir.join("va.csv");
        let md = dir.join("md.csv");
        std::fs::write(
            &va,
            "site_no,station_nm,dec_long_va,dec_lat_va,drain_area_va\n\
             01646500,POTOMAC RIVER NEAR WASH,-77.1276,38.9498,11560\n\
             01638500,POTOMAC RIVER AT POINT OF ROCKS,-77.5430,39.2737,9651\n",
        )
        .unwrap();
        std::fs::write(
            &md,
            "site_no,station_nm,dec_long_va,dec_lat_va,drain_area_va\n\
             01594440,PATUXENT RIVER NEAR BOWIE,-76.6936,38.9559,348\n",
        )
        .unwrap();

        let fc = load_point_tables(&[va, md], &config()).unwrap();

        assert_eq!(fc.crs, Crs::Epsg(4269));
        let ids: Vec<&str> = fc.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["01646500", "01638500", "01594440"]);

        let first = &fc.features[0];
        assert_eq!(first.attribute("region"), Some(&AttrValue::from("va")));
        assert_eq!(fc.features[2].attribute("region"), Some(&AttrValue::from("md")));
        assert_eq!(first.attribute("drain_area_va"), Some(&AttrValue::Int(11560)));
        assert_eq!(
            first.attribute("site_no"),
            Some(&AttrValue::Text("01646500".to_string()))
        );

        let Geometry::Point(p) = first.geometry else {
            panic!("expected point");
        };
        assert!((p.x() - -77.1276).abs() < 1e-12);
        assert!((p.y() - 38.9498).abs() < 1e-12);
    }

    #[test]
    fn numeric_ids_are_kept_as_text() {
        let dir = scratch_dir("numeric_ids");
        let path = dir.join("gauges.csv");
        std::fs::write(&path, "site_no,dec_long_va,dec_lat_va\n42,-77.0,39.0\n").unwrap();

        let fc = load_point_tables(&[path], &config()).unwrap();
        assert_eq!(fc.features[0].id, "42");
        assert_eq!(
            fc.features[0].attribute("site_no"),
            Some(&AttrValue::Text("42".to_string()))
        );
    }

    #[test]
    fn reports_every_missing_column() {
        let dir = scratch_dir("schema");
        let path = dir.join("stations.csv");
        std::fs::write(&path, "site_no,lon,lat\n01646500,-77.1,38.9\n").unwrap();

        let err = load_point_tables(&[path], &config()).unwrap_err();
        match err {
            SourceError::SchemaMismatch { missing, .. } => {
                assert_eq!(
                    missing,
                    vec!["dec_long_va".to_string(), "dec_lat_va".to_string()]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_fails_before_any_read() {
        let dir = scratch_dir("missing");
        let good = dir.join("good.csv");
        std::fs::write(&good, "site_no,dec_long_va,dec_lat_va\n1,0,0\n").unwrap();

        let err = load_point_tables(&[good, dir.join("absent.csv")], &config()).unwrap_err();
        assert!(matches!(err, SourceError::SourceNotFound { path } if path.ends_with("absent.csv")));
    }

    #[test]
    fn non_numeric_coordinate_is_malformed() {
        let dir = scratch_dir("malformed");
        let path = dir.join("stations.csv");
        std::fs::write(
            &path,
            "site_no,dec_long_va,dec_lat_va\n01646500,-77.1,north\n",
        )
        .unwrap();

        let err = load_point_tables(&[path], &config()).unwrap_err();
        assert!(matches!(err, SourceError::MalformedGeometry { .. }));
    }

    #[test]
    fn empty_coordinate_is_a_missing_value() {
        let dir = scratch_dir("empty_coord");
        let path = dir.join("stations.csv");
        std::fs::write(&path, "site_no,dec_long_va,dec_lat_va\n01646500,,38.9\n").unwrap();

        let err = load_point_tables(&[path], &config()).unwrap_err();
        match err {
            SourceError::MissingValue { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, "dec_long_va");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn honors_custom_delimiter() {
        let dir = scratch_dir("delimiter");
        let path = dir.join("stations.txt");
        std::fs::write(
            &path,
            "site_no\tdec_long_va\tdec_lat_va\n01646500\t-77.1\t38.9\n",
        )
        .unwrap();

        let mut cfg = config();
        cfg.delimiter = Some('\t');
        cfg.source_column = None;
        let fc = load_point_tables(&[path], &cfg).unwrap();
        assert_eq!(fc.len(), 1);
        assert!(fc.features[0].attribute("region").is_none());
    }
}
