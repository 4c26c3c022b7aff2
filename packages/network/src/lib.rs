#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! External data fetching.
//!
//! The pipeline talks to the remote hydrologic index only through the
//! [`NetworkIndex`] trait, so the batch logic here can be driven by a fake
//! in tests. [`NldiClient`] is the HTTP implementation.
//!
//! Each origin of a batch is an isolated unit of work: it runs under its
//! own timeout, and a failure produces an empty traversal plus a
//! [`FetchFailure`] without disturbing the other origins.

pub mod nldi;
pub mod nwis;
pub mod progress;
pub mod retry;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt as _;
use geo::{Coord, Geometry};
use hydro_map_feature_models::{Crs, Feature, FeatureCollection, GeometryKind};
use hydro_map_network_models::{
    FetchOptions, NavigationRequest, NetworkTraversalResult, Traversal,
};
use hydro_map_series_models::TimeSeriesRecord;

pub use nldi::NldiClient;
pub use progress::{NullProgress, ProgressCallback, null_progress};

/// Most sites NWIS accepts in one daily-values request.
pub const MAX_SITES_PER_REQUEST: usize = 100;

/// Errors from the remote index.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// The response could not be interpreted.
    #[error("Unexpected response: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },

    /// The origin did not snap to any network segment.
    #[error("Origin is not on the indexed network")]
    OriginNotFound,

    /// The per-origin time budget ran out.
    #[error("Timed out after {millis} ms")]
    Timeout {
        /// Budget in milliseconds.
        millis: u64,
    },

    /// The origin record cannot be used as a navigation start.
    #[error("Invalid origin: {message}")]
    InvalidOrigin {
        /// Description of what went wrong.
        message: String,
    },

    /// The origins are not in WGS 84 longitude/latitude.
    #[error("Origins must be in {}, found {crs}", Crs::WGS84)]
    OriginCrs {
        /// CRS of the origin collection.
        crs: Crs,
    },

    /// The navigation request is unusable.
    #[error("Invalid navigation request: {message}")]
    InvalidRequest {
        /// Description of what went wrong.
        message: String,
    },
}

/// A remote index of river-network features and site observations.
#[async_trait]
pub trait NetworkIndex: Send + Sync {
    /// Walks the network from the segment nearest `origin` (longitude,
    /// latitude).
    async fn navigate(
        &self,
        origin: Coord<f64>,
        request: &NavigationRequest,
    ) -> Result<Traversal, FetchError>;

    /// Fetches daily values for `sites` from `start` through `end` (open
    /// ended when `None`). Sites without data contribute no records.
    async fn daily_values(
        &self,
        sites: &[String],
        parameter_code: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<TimeSeriesRecord>, FetchError>;
}

/// An origin whose fetch failed.
#[derive(Debug)]
pub struct FetchFailure {
    /// Position of the origin in the input collection.
    pub origin_index: usize,
    /// Identifier of the origin record.
    pub origin_id: String,
    /// What went wrong.
    pub error: FetchError,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "origin #{} ({}): {}",
            self.origin_index, self.origin_id, self.error
        )
    }
}

/// Results of a batch fetch in origin order.
#[derive(Debug, Default)]
pub struct TraversalBatch {
    /// One entry per origin, empty for failed origins.
    pub results: Vec<NetworkTraversalResult>,
    /// Origins whose fetch failed.
    pub failures: Vec<FetchFailure>,
}

impl TraversalBatch {
    /// Distinct linked sites across all traversals, first occurrence wins.
    #[must_use]
    pub fn sites(&self) -> FeatureCollection {
        merge_distinct(self.results.iter().map(|r| &r.sites))
    }

    /// Distinct flowlines across all traversals, first occurrence wins.
    #[must_use]
    pub fn flowlines(&self) -> FeatureCollection {
        merge_distinct(self.results.iter().map(|r| &r.flowlines))
    }
}

fn merge_distinct<'a>(collections: impl Iterator<Item = &'a FeatureCollection>) -> FeatureCollection {
    let mut seen = BTreeSet::new();
    let mut merged = FeatureCollection::new(Crs::WGS84);

    for feature in collections.flat_map(FeatureCollection::iter) {
        if seen.insert(feature.id.clone()) {
            merged.push(feature.clone());
        }
    }

    merged
}

fn origin_coord(feature: &Feature) -> Result<Coord<f64>, FetchError> {
    match &feature.geometry {
        Geometry::Point(p) if p.x().is_finite() && p.y().is_finite() => Ok(p.0),
        Geometry::Point(_) => Err(FetchError::InvalidOrigin {
            message: "non-finite coordinates".to_string(),
        }),
        other => Err(FetchError::InvalidOrigin {
            message: format!(
                "expected a point, found {}",
                GeometryKind::of(other).as_str()
            ),
        }),
    }
}

/// Navigates from every origin concurrently.
///
/// At most `options.concurrency` origins are in flight; results come back
/// in origin order regardless of completion order.
///
/// # Errors
///
/// Returns [`FetchError::OriginCrs`] if the origins are not in EPSG:4326
/// and [`FetchError::InvalidRequest`] for a non-positive distance. Per
/// origin errors are returned in [`TraversalBatch::failures`].
pub async fn fetch_traversals<I>(
    index: &I,
    origins: &FeatureCollection,
    request: &NavigationRequest,
    options: &FetchOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<TraversalBatch, FetchError>
where
    I: NetworkIndex + ?Sized,
{
    if origins.crs != Crs::WGS84 {
        return Err(FetchError::OriginCrs {
            crs: origins.crs.clone(),
        });
    }
    if !request.is_valid() {
        return Err(FetchError::InvalidRequest {
            message: format!("distance must be positive, got {} km", request.distance_km),
        });
    }

    let timeout = Duration::from_millis(options.timeout_ms);
    progress.set_total(origins.len() as u64);
    progress.set_message(format!("Navigating {} ({} km)", request.mode, request.distance_km));

    let outcomes: Vec<(usize, Result<Traversal, FetchError>)> =
        futures::stream::iter(origins.iter().enumerate().map(|(i, feature)| async move {
            let outcome = match origin_coord(feature) {
                Ok(coord) => match tokio::time::timeout(timeout, index.navigate(coord, request)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        millis: options.timeout_ms,
                    }),
                },
                Err(e) => Err(e),
            };
            progress.inc(1);
            (i, outcome)
        }))
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let mut batch = TraversalBatch::default();

    for (i, outcome) in outcomes {
        let origin_id = origins.features[i].id.clone();
        match outcome {
            Ok(traversal) => {
                log::debug!(
                    "{origin_id}: COMID {}, {} sites, {} flowlines",
                    traversal.comid,
                    traversal.sites.len(),
                    traversal.flowlines.len()
                );
                batch.results.push(NetworkTraversalResult::from_traversal(
                    i, origin_id, request, traversal,
                ));
            }
            Err(error) => {
                log::warn!("Fetch failed for origin #{i} ({origin_id}): {error}");
                batch
                    .results
                    .push(NetworkTraversalResult::empty(i, origin_id.clone(), request));
                batch.failures.push(FetchFailure {
                    origin_index: i,
                    origin_id,
                    error,
                });
            }
        }
    }

    progress.finish(format!(
        "{} origins, {} failed",
        origins.len(),
        batch.failures.len()
    ));
    log::info!(
        "Fetched {} traversals ({} failed)",
        batch.results.len(),
        batch.failures.len()
    );

    Ok(batch)
}

/// Fetches daily values for a list of sites, batching the request.
///
/// Agency prefixes are stripped and duplicate sites removed. An empty
/// site list returns no records without contacting the index.
///
/// # Errors
///
/// Returns the first [`FetchError`] from the index.
pub async fn fetch_daily_values<I>(
    index: &I,
    sites: &[String],
    parameter_code: &str,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> Result<Vec<TimeSeriesRecord>, FetchError>
where
    I: NetworkIndex + ?Sized,
{
    let unique: Vec<String> = sites
        .iter()
        .map(|s| nwis::strip_agency(s).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut records = Vec::new();

    for chunk in unique.chunks(MAX_SITES_PER_REQUEST) {
        let mut fetched = index
            .daily_values(chunk, parameter_code, start, end)
            .await?;
        log::debug!(
            "{} records of {parameter_code} for {} sites",
            fetched.len(),
            chunk.len()
        );
        records.append(&mut fetched);
    }

    log::info!(
        "Fetched {} daily values of {parameter_code} for {} sites since {start}",
        records.len(),
        unique.len()
    );

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use geo::line_string;
    use hydro_map_network_models::NavigationMode;

    /// Serves canned traversals keyed by origin longitude.
    struct FakeIndex {
        calls: AtomicUsize,
    }

    impl FakeIndex {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    fn site(id: &str, x: f64, y: f64) -> Feature {
        Feature::new(id, geo::point!(x: x, y: y))
    }

    #[async_trait]
    impl NetworkIndex for FakeIndex {
        async fn navigate(
            &self,
            origin: Coord<f64>,
            _request: &NavigationRequest,
        ) -> Result<Traversal, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            #[allow(clippy::cast_possible_truncation)]
            let key = origin.x as i64;

            match key {
                // slow origin, finishes after the others
                1 => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Traversal {
                        comid: "100".to_string(),
                        sites: FeatureCollection::with_features(
                            Crs::WGS84,
                            vec![site("A", 1.0, 0.0), site("B", 1.1, 0.0)],
                        ),
                        flowlines: FeatureCollection::new(Crs::WGS84),
                    })
                }
                2 => Ok(Traversal {
                    comid: "200".to_string(),
                    sites: FeatureCollection::with_features(
                        Crs::WGS84,
                        vec![site("B", 1.1, 0.0), site("C", 2.0, 0.0)],
                    ),
                    flowlines: FeatureCollection::new(Crs::WGS84),
                }),
                // hangs well past any test timeout
                3 => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(FetchError::OriginNotFound)
                }
                _ => Err(FetchError::OriginNotFound),
            }
        }

        async fn daily_values(
            &self,
            sites: &[String],
            parameter_code: &str,
            start: NaiveDate,
            _end: Option<NaiveDate>,
        ) -> Result<Vec<TimeSeriesRecord>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(sites
                .iter()
                .filter(|s| s.as_str() != "NODATA")
                .map(|s| TimeSeriesRecord::new(s.clone(), start, parameter_code, Some(1.0)))
                .collect())
        }
    }

    fn origins(xs: &[f64]) -> FeatureCollection {
        FeatureCollection::with_features(
            Crs::WGS84,
            xs.iter()
                .enumerate()
                .map(|(i, &x)| site(&format!("origin-{i}"), x, 39.0))
                .collect(),
        )
    }

    fn request() -> NavigationRequest {
        NavigationRequest::new(NavigationMode::UpstreamMainstem, 25.0)
    }

    #[tokio::test]
    async fn results_follow_document_order() {
        let index = FakeIndex::new();
        let options = FetchOptions {
            concurrency: 4,
            timeout_ms: 5_000,
        };

        let batch = fetch_traversals(&index, &origins(&[1.0, 2.0]), &request(), &options, &null_progress())
            .await
            .unwrap();

        assert!(batch.failures.is_empty());
        let comids: Vec<Option<&str>> = batch.results.iter().map(|r| r.comid.as_deref()).collect();
        assert_eq!(comids, vec![Some("100"), Some("200")]);

        let sites: Vec<String> = batch.sites().iter().map(|f| f.id.clone()).collect();
        assert_eq!(sites, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_isolated() {
        let index = FakeIndex::new();
        let options = FetchOptions {
            concurrency: 3,
            timeout_ms: 200,
        };

        let batch = fetch_traversals(
            &index,
            &origins(&[3.0, 2.0, 9.0, 1.0]),
            &request(),
            &options,
            &null_progress(),
        )
        .await
        .unwrap();

        assert_eq!(batch.results.len(), 4);
        assert_eq!(batch.results[1].comid.as_deref(), Some("200"));
        assert_eq!(batch.results[3].comid.as_deref(), Some("100"));
        assert!(batch.results[0].is_empty());
        assert!(batch.results[2].is_empty());

        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[0].origin_index, 0);
        assert!(matches!(batch.failures[0].error, FetchError::Timeout { millis: 200 }));
        assert_eq!(batch.failures[1].origin_id, "origin-2");
        assert!(matches!(batch.failures[1].error, FetchError::OriginNotFound));
    }

    #[tokio::test]
    async fn non_point_origin_is_a_per_origin_failure() {
        let index = FakeIndex::new();
        let mut input = origins(&[2.0]);
        input.push(Feature::new(
            "reach",
            geo::line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)],
        ));

        let batch = fetch_traversals(&index, &input, &request(), &FetchOptions::default(), &null_progress())
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(batch.failures[0].error, FetchError::InvalidOrigin { .. }));
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn projected_origins_are_rejected() {
        let index = FakeIndex::new();
        let mut input = origins(&[2.0]);
        input.crs = Crs::Epsg(5070);

        let err = fetch_traversals(&index, &input, &request(), &FetchOptions::default(), &null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::OriginCrs { .. }));
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn daily_values_dedupes_and_tolerates_missing_data() {
        let index = FakeIndex::new();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let sites = vec![
            "USGS-01646500".to_string(),
            "01646500".to_string(),
            "NODATA".to_string(),
        ];

        let records = fetch_daily_values(&index, &sites, "00060", start, None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "01646500");

        let none = fetch_daily_values(&index, &[], "00060", start, None).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    }
}
