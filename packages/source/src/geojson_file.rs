//! `GeoJSON` boundary files.

use std::collections::BTreeMap;
use std::path::Path;

use geojson::{GeoJson, JsonObject, feature::Id};
use hydro_map_feature_models::{AttrValue, Crs, Feature, FeatureCollection};
use hydro_map_source_models::BoundaryConfig;

use crate::SourceError;

/// Reads a `GeoJSON` `FeatureCollection`, `Feature`, or bare geometry.
///
/// The CRS comes from the config override, then the legacy top-level
/// `crs` member, then defaults to WGS 84 as RFC 7946 requires.
///
/// # Errors
///
/// Returns [`SourceError::MalformedGeometry`] if the document cannot be
/// parsed or a feature has no usable geometry, and
/// [`SourceError::SchemaMismatch`] if the configured id field is absent
/// from a feature.
pub fn read(path: &Path, config: &BoundaryConfig) -> Result<FeatureCollection, SourceError> {
    let text = std::fs::read_to_string(path)?;
    let document: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| SourceError::malformed(path, e))?;

    let (features, foreign_members) = match document {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(feature) => (vec![feature], None),
        GeoJson::Geometry(geometry) => (
            vec![geojson::Feature {
                geometry: Some(geometry),
                ..Default::default()
            }],
            None,
        ),
    };

    let crs = config.crs.clone().unwrap_or_else(|| {
        declared_crs(foreign_members.as_ref()).unwrap_or_else(|| {
            log::debug!("{} declares no CRS, assuming {}", path.display(), Crs::WGS84);
            Crs::WGS84
        })
    });

    let features = features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| convert_feature(path, index, feature, config))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeatureCollection::with_features(crs, features))
}

/// Reads the pre-RFC 7946 `{"crs": {"type": "name", "properties": {"name": ...}}}`
/// member that many exports still carry.
fn declared_crs(foreign_members: Option<&JsonObject>) -> Option<Crs> {
    let name = foreign_members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;

    match name.parse::<Crs>() {
        Ok(crs) => Some(crs),
        Err(e) => {
            log::warn!("Ignoring unreadable crs member '{name}': {e}");
            None
        }
    }
}

fn convert_feature(
    path: &Path,
    index: usize,
    feature: geojson::Feature,
    config: &BoundaryConfig,
) -> Result<Feature, SourceError> {
    let Some(geometry) = feature.geometry else {
        return Err(SourceError::malformed(
            path,
            format!("feature #{index} has no geometry"),
        ));
    };

    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| SourceError::malformed(path, format!("feature #{index}: {e}")))?;

    let attributes: BTreeMap<String, AttrValue> = feature
        .properties
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, AttrValue::from(value)))
        .collect();

    let id = match &config.id_field {
        Some(field) => attributes
            .get(field)
            .and_then(AttrValue::to_key_string)
            .ok_or_else(|| SourceError::SchemaMismatch {
                path: path.to_path_buf(),
                missing: vec![field.clone()],
            })?,
        None => match feature.id {
            Some(Id::String(s)) => s,
            Some(Id::Number(n)) => n.to_string(),
            None => index.to_string(),
        },
    };

    Ok(Feature {
        id,
        geometry,
        attributes,
    })
}
