//! HTTP client for the Hydro Network-Linked Data Index and NWIS.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use geo::Coord;
use geojson::GeoJson;
use hydro_map_feature_models::{AttrValue, Crs, Feature, FeatureCollection};
use hydro_map_network_models::{NavigationRequest, NetworkConfig, Traversal};
use hydro_map_series_models::TimeSeriesRecord;

use crate::nwis::{parse_daily_values, strip_agency};
use crate::{FetchError, NetworkIndex, retry};

/// NLDI data source holding NWIS surface-water sites.
const SITE_SOURCE: &str = "nwissite";

/// [`NetworkIndex`] backed by the public NLDI and NWIS web services.
pub struct NldiClient {
    client: reqwest::Client,
    config: NetworkConfig,
}

impl NldiClient {
    /// Creates a client for the given endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: NetworkConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hydro_map/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.nldi_url.trim_end_matches('/')
    }

    async fn resolve_comid(&self, origin: Coord<f64>) -> Result<String, FetchError> {
        let url = format!("{}/linked-data/comid/position", self.base());
        let coords = format!("POINT({} {})", origin.x, origin.y);

        let body = retry::send_json(|| {
            self.client
                .get(&url)
                .query(&[("f", "json"), ("coords", coords.as_str())])
        })
        .await?;

        parse_comid(&body)
    }

    async fn navigation_features(
        &self,
        comid: &str,
        request: &NavigationRequest,
        data_source: &str,
    ) -> Result<FeatureCollection, FetchError> {
        let url = format!(
            "{}/linked-data/comid/{comid}/navigation/{}/{data_source}",
            self.base(),
            request.mode.code()
        );
        let distance = request.distance_km.to_string();

        let result = retry::send_json(|| {
            self.client
                .get(&url)
                .query(&[("f", "json"), ("distance", distance.as_str())])
        })
        .await;

        match result {
            Ok(body) => collection_from_geojson(body),
            // NLDI answers 404 when nothing of this source lies on the walk.
            Err(FetchError::Status { status: 404, .. }) => {
                log::debug!("No {data_source} features along {comid} {}", request.mode);
                Ok(FeatureCollection::new(Crs::WGS84))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl NetworkIndex for NldiClient {
    async fn navigate(
        &self,
        origin: Coord<f64>,
        request: &NavigationRequest,
    ) -> Result<Traversal, FetchError> {
        let comid = self.resolve_comid(origin).await?;
        log::debug!("({}, {}) snapped to COMID {comid}", origin.x, origin.y);

        let flowlines = self.navigation_features(&comid, request, "flowlines").await?;
        let sites = self
            .navigation_features(&comid, request, SITE_SOURCE)
            .await?;

        Ok(Traversal {
            comid,
            sites,
            flowlines,
        })
    }

    async fn daily_values(
        &self,
        sites: &[String],
        parameter_code: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<TimeSeriesRecord>, FetchError> {
        let site_list = sites
            .iter()
            .map(|s| strip_agency(s))
            .collect::<Vec<_>>()
            .join(",");
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.map(|d| d.format("%Y-%m-%d").to_string());

        let result = retry::send_json(|| {
            let mut params = vec![
                ("format", "json"),
                ("siteStatus", "all"),
                ("sites", site_list.as_str()),
                ("parameterCd", parameter_code),
                ("statCd", self.config.statistic_code.as_str()),
                ("startDT", start.as_str()),
            ];
            if let Some(end) = &end {
                params.push(("endDT", end.as_str()));
            }
            self.client.get(&self.config.nwis_dv_url).query(&params)
        })
        .await;

        match result {
            Ok(body) => parse_daily_values(body, &self.config.statistic_code),
            // NWIS answers 404 when no site has data for the window.
            Err(FetchError::Status { status: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Extracts the COMID from a `comid/position` response.
///
/// # Errors
///
/// Returns [`FetchError::OriginNotFound`] if the response has no feature.
pub fn parse_comid(body: &serde_json::Value) -> Result<String, FetchError> {
    let properties = body
        .get("features")
        .and_then(|f| f.get(0))
        .and_then(|f| f.get("properties"))
        .ok_or(FetchError::OriginNotFound)?;

    ["comid", "identifier"]
        .iter()
        .find_map(|key| match properties.get(*key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or(FetchError::OriginNotFound)
}

/// Converts an NLDI `GeoJSON` response to a WGS 84 collection.
///
/// Site ids come from `identifier` with the agency prefix removed,
/// flowline ids from `nhdplus_comid`; features with neither use their
/// ordinal. Features without geometry are skipped.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if the body is not `GeoJSON`.
pub fn collection_from_geojson(body: serde_json::Value) -> Result<FeatureCollection, FetchError> {
    let document = GeoJson::from_json_value(body).map_err(|e| FetchError::Parse {
        message: format!("invalid GeoJSON: {e}"),
    })?;

    let features = match document {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(_) => {
            return Err(FetchError::Parse {
                message: "expected features, found a bare geometry".to_string(),
            });
        }
    };

    let mut collection = FeatureCollection::new(Crs::WGS84);

    for (index, feature) in features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            log::debug!("Skipping NLDI feature #{index} without geometry");
            continue;
        };
        let geometry: geo::Geometry<f64> =
            geometry.try_into().map_err(|e: geojson::Error| FetchError::Parse {
                message: format!("feature #{index}: {e}"),
            })?;

        let attributes: BTreeMap<String, AttrValue> = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, AttrValue::from(v)))
            .collect();

        let id = ["identifier", "nhdplus_comid", "comid"]
            .iter()
            .find_map(|key| attributes.get(*key).and_then(AttrValue::to_key_string))
            .map_or_else(|| index.to_string(), |id| strip_agency(&id).to_string());

        collection.push(Feature {
            id,
            geometry,
            attributes,
        });
    }

    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_map_feature_models::GeometryKind;

    #[test]
    fn parses_position_response() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[-77.12, 38.95], [-77.13, 38.96]]},
                "properties": {"identifier": "4512772", "comid": "4512772", "source": "comid"}
            }]
        });
        assert_eq!(parse_comid(&body).unwrap(), "4512772");

        let numeric = serde_json::json!({"features": [{"properties": {"comid": 22_338_561}}]});
        assert_eq!(parse_comid(&numeric).unwrap(), "22338561");

        let empty = serde_json::json!({"type": "FeatureCollection", "features": []});
        assert!(matches!(parse_comid(&empty), Err(FetchError::OriginNotFound)));
    }

    #[test]
    fn converts_site_features() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [-77.1276, 38.9498]},
                    "properties": {
                        "identifier": "USGS-01646500",
                        "name": "POTOMAC RIVER NEAR WASH, DC LITTLE FALLS PUMP STA",
                        "comid": "4512772",
                        "source": "nwissite"
                    }
                },
                {"type": "Feature", "geometry": null, "properties": {"identifier": "USGS-0"}}
            ]
        });

        let fc = collection_from_geojson(body).unwrap();
        assert_eq!(fc.crs, Crs::WGS84);
        assert_eq!(fc.len(), 1);
        assert_eq!(fc.features[0].id, "01646500");
        assert_eq!(fc.features[0].kind(), GeometryKind::Point);
    }

    #[test]
    fn flowlines_use_nhdplus_comid() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]},
                "properties": {"nhdplus_comid": 4_512_772}
            }]
        });
        let fc = collection_from_geojson(body).unwrap();
        assert_eq!(fc.features[0].id, "4512772");
        assert_eq!(fc.features[0].kind(), GeometryKind::Line);
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = NldiClient::new(NetworkConfig {
            nldi_url: "https://example.test/nldi/".to_string(),
            ..NetworkConfig::default()
        })
        .unwrap();
        assert_eq!(client.base(), "https://example.test/nldi");
    }
}
