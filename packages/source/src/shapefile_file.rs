//! ESRI shapefiles with `.dbf` attributes and an optional `.prj` sidecar.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use hydro_map_feature_models::{AttrValue, Crs, Feature, FeatureCollection};
use hydro_map_source_models::BoundaryConfig;
use shapefile::dbase::FieldValue;

use crate::SourceError;

/// Reads every shape and its attribute record.
///
/// # Errors
///
/// Returns [`SourceError::MissingCrs`] if there is neither a `.prj` file
/// nor a configured CRS, and [`SourceError::MalformedGeometry`] if a shape
/// cannot be read or converted.
pub fn read(path: &Path, config: &BoundaryConfig) -> Result<FeatureCollection, SourceError> {
    let crs = match &config.crs {
        Some(crs) => crs.clone(),
        None => read_prj(path)?,
    };

    let mut reader =
        shapefile::Reader::from_path(path).map_err(|e| SourceError::malformed(path, e))?;

    let mut collection = FeatureCollection::new(crs);

    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.map_err(|e| SourceError::malformed(path, e))?;

        let geometry = geo::Geometry::<f64>::try_from(shape)
            .map_err(|e| SourceError::malformed(path, format!("shape #{index}: {e}")))?;

        let attributes: BTreeMap<String, AttrValue> = HashMap::<String, FieldValue>::from(record)
            .into_iter()
            .map(|(name, value)| (name, field_value(value)))
            .collect();

        let id = match &config.id_field {
            Some(field) => attributes
                .get(field)
                .and_then(AttrValue::to_key_string)
                .ok_or_else(|| SourceError::SchemaMismatch {
                    path: path.to_path_buf(),
                    missing: vec![field.clone()],
                })?,
            None => index.to_string(),
        };

        collection.push(Feature {
            id,
            geometry,
            attributes,
        });
    }

    Ok(collection)
}

/// Reads the WKT from the sibling `.prj` file.
///
/// # Errors
///
/// Returns [`SourceError::MissingCrs`] if the file is absent or empty.
pub fn read_prj(shp_path: &Path) -> Result<Crs, SourceError> {
    let prj_path = shp_path.with_extension("prj");
    if !prj_path.is_file() {
        return Err(SourceError::MissingCrs {
            path: shp_path.to_path_buf(),
        });
    }

    let wkt = std::fs::read_to_string(&prj_path)?;
    let wkt = wkt.trim();
    if wkt.is_empty() {
        return Err(SourceError::MissingCrs {
            path: shp_path.to_path_buf(),
        });
    }

    log::debug!("Using CRS from {}", prj_path.display());

    Ok(Crs::Definition(wkt.to_string()))
}

#[allow(clippy::cast_possible_truncation)]
fn field_value(value: FieldValue) -> AttrValue {
    match value {
        FieldValue::Character(Some(s)) => AttrValue::Text(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) => {
            if n.fract() == 0.0 && n.abs() < 9.0e15 {
                AttrValue::Int(n as i64)
            } else {
                AttrValue::Float(n)
            }
        }
        FieldValue::Float(Some(f)) => AttrValue::Float(f64::from(f)),
        FieldValue::Integer(i) => AttrValue::Int(i64::from(i)),
        FieldValue::Double(d) | FieldValue::Currency(d) => AttrValue::Float(d),
        FieldValue::Logical(Some(b)) => AttrValue::Bool(b),
        FieldValue::Memo(s) => AttrValue::Text(s),
        FieldValue::Date(Some(d)) => {
            AttrValue::Text(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        _ => AttrValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn reads_prj_wkt_as_definition() {
        let dir = scratch_dir("prj");
        let shp = dir.join("huc8.shp");
        std::fs::write(
            dir.join("huc8.prj"),
            "GEOGCS[\"GCS_North_American_1983\",DATUM[\"D_North_American_1983\",\
             SPHEROID[\"GRS_1980\",6378137.0,298.257222101]],PRIMEM[\"Greenwich\",0.0],\
             UNIT[\"Degree\",0.0174532925199433]]\n",
        )
        .unwrap();

        let crs = read_prj(&shp).unwrap();
        assert!(matches!(&crs, Crs::Definition(wkt) if wkt.starts_with("GEOGCS")));
        assert!(crs.is_geographic());
    }

    const ALBERS_WKT: &str = "PROJCS[\"NAD83 / Conus Albers\",GEOGCS[\"NAD83\",\
        DATUM[\"North_American_Datum_1983\",SPHEROID[\"GRS 1980\",6378137,298.257222101]],\
        PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]],\
        PROJECTION[\"Albers_Conic_Equal_Area\"],UNIT[\"metre\",1]]";

    fn square(x0: f64, side: f64) -> shapefile::Polygon {
        use shapefile::{Point, PolygonRing};
        shapefile::Polygon::new(PolygonRing::Outer(vec![
            Point::new(x0, 0.0),
            Point::new(x0, side),
            Point::new(x0 + side, side),
            Point::new(x0 + side, 0.0),
            Point::new(x0, 0.0),
        ]))
    }

    /// Writes a two-polygon HUC8 shapefile with a `.prj` next to it.
    fn write_huc8(dir: &Path) -> std::path::PathBuf {
        use shapefile::dbase::{FieldName, Record, TableWriterBuilder};

        let shp = dir.join("huc8.shp");
        let table = TableWriterBuilder::new()
            .add_character_field(FieldName::try_from("HUC8").unwrap(), 8)
            .add_character_field(FieldName::try_from("NAME").unwrap(), 40)
            .add_numeric_field(FieldName::try_from("AREA_KM2").unwrap(), 12, 2);

        {
            let mut writer = shapefile::Writer::from_path(&shp, table).unwrap();
            for (huc, name, area, x0) in [
                ("02070008", "Middle Potomac-Catoctin", 100.0, 0.0),
                ("02070010", "Middle Potomac-Anacostia", 12.5, 20.0),
            ] {
                let mut record = Record::default();
                record.insert("HUC8".to_string(), FieldValue::Character(Some(huc.to_string())));
                record.insert("NAME".to_string(), FieldValue::Character(Some(name.to_string())));
                record.insert("AREA_KM2".to_string(), FieldValue::Numeric(Some(area)));
                writer.write_shape_and_record(&square(x0, 10.0), &record).unwrap();
            }
        }

        std::fs::write(dir.join("huc8.prj"), ALBERS_WKT).unwrap();
        shp
    }

    #[test]
    fn loads_shapefile_with_attributes_and_prj() {
        use geo::Area;

        let dir = scratch_dir("shp_roundtrip");
        let shp = write_huc8(&dir);
        let config = BoundaryConfig {
            id_field: Some("HUC8".to_string()),
            crs: None,
        };

        let fc = crate::load_boundaries(&shp, &config).unwrap();

        assert!(matches!(&fc.crs, Crs::Definition(wkt) if wkt.starts_with("PROJCS")));
        let ids: Vec<_> = fc.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["02070008", "02070010"]);

        let first = &fc.features[0];
        assert_eq!(
            first.attribute("NAME"),
            Some(&AttrValue::from("Middle Potomac-Catoctin"))
        );
        assert_eq!(first.attribute("AREA_KM2"), Some(&AttrValue::Int(100)));
        assert_eq!(fc.features[1].attribute("AREA_KM2"), Some(&AttrValue::Float(12.5)));
        assert!((first.geometry.unsigned_area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn configured_crs_overrides_prj_and_ordinals_are_default_ids() {
        let dir = scratch_dir("shp_override");
        let shp = write_huc8(&dir);
        let config = BoundaryConfig {
            id_field: None,
            crs: Some(Crs::Epsg(5070)),
        };

        let fc = read(&shp, &config).unwrap();
        assert_eq!(fc.crs, Crs::Epsg(5070));
        let ids: Vec<_> = fc.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["0", "1"]);
    }

    #[test]
    fn unknown_id_field_is_schema_mismatch() {
        let dir = scratch_dir("shp_bad_id");
        let shp = write_huc8(&dir);
        let config = BoundaryConfig {
            id_field: Some("GNIS_ID".to_string()),
            crs: None,
        };

        let err = read(&shp, &config).unwrap_err();
        assert!(matches!(err, SourceError::SchemaMismatch { missing, .. } if missing == ["GNIS_ID"]));
    }

    #[test]
    fn missing_prj_is_missing_crs() {
        let dir = scratch_dir("no_prj");
        let err = read_prj(&dir.join("huc8.shp")).unwrap_err();
        assert!(matches!(err, SourceError::MissingCrs { .. }));
    }

    #[test]
    fn converts_dbase_values() {
        assert_eq!(
            field_value(FieldValue::Character(Some("Potomac  ".to_string()))),
            AttrValue::Text("Potomac".to_string())
        );
        assert_eq!(field_value(FieldValue::Numeric(Some(12.0))), AttrValue::Int(12));
        assert_eq!(
            field_value(FieldValue::Numeric(Some(12.5))),
            AttrValue::Float(12.5)
        );
        assert_eq!(field_value(FieldValue::Numeric(None)), AttrValue::Null);
        assert_eq!(
            field_value(FieldValue::Logical(Some(true))),
            AttrValue::Bool(true)
        );
    }
}
