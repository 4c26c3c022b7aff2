#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! River-network navigation types.
//!
//! A navigation starts at the network segment (COMID) nearest an origin
//! point and walks the flowline graph in one of four modes, bounded by a
//! distance in kilometres. The result holds the visited flowlines and the
//! monitoring sites linked to them, both in WGS 84.

use std::fmt;
use std::str::FromStr;

use hydro_map_feature_models::{Crs, FeatureCollection};
use serde::{Deserialize, Serialize};

/// Default NLDI endpoint.
pub const DEFAULT_NLDI_URL: &str = "https://api.water.usgs.gov/nldi";
/// Default NWIS daily-values endpoint.
pub const DEFAULT_NWIS_DV_URL: &str = "https://waterservices.usgs.gov/nwis/dv/";
/// NWIS statistic code of the daily mean.
pub const DAILY_MEAN_STATISTIC: &str = "00003";

/// Direction and branching rule of a network walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NavigationMode {
    /// Upstream along the main stem only.
    #[default]
    #[serde(rename = "UM", alias = "upstream_mainstem")]
    UpstreamMainstem,
    /// Upstream including tributaries.
    #[serde(rename = "UT", alias = "upstream_tributaries")]
    UpstreamTributaries,
    /// Downstream along the main stem only.
    #[serde(rename = "DM", alias = "downstream_mainstem")]
    DownstreamMainstem,
    /// Downstream including diversions.
    #[serde(rename = "DD", alias = "downstream_diversions")]
    DownstreamDiversions,
}

impl NavigationMode {
    /// Two-letter code used in NLDI URLs.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UpstreamMainstem => "UM",
            Self::UpstreamTributaries => "UT",
            Self::DownstreamMainstem => "DM",
            Self::DownstreamDiversions => "DD",
        }
    }
}

impl fmt::Display for NavigationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a navigation mode code is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown navigation mode '{0}' (expected UM, UT, DM or DD)")]
pub struct UnknownNavigationMode(pub String);

impl FromStr for NavigationMode {
    type Err = UnknownNavigationMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UM" => Ok(Self::UpstreamMainstem),
            "UT" => Ok(Self::UpstreamTributaries),
            "DM" => Ok(Self::DownstreamMainstem),
            "DD" => Ok(Self::DownstreamDiversions),
            _ => Err(UnknownNavigationMode(s.to_string())),
        }
    }
}

/// What to fetch for each origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavigationRequest {
    /// Walk direction.
    #[serde(default)]
    pub mode: NavigationMode,
    /// Maximum walk length in kilometres.
    pub distance_km: f64,
}

impl NavigationRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(mode: NavigationMode, distance_km: f64) -> Self {
        Self { mode, distance_km }
    }

    /// Returns `true` if the distance is finite and positive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.distance_km.is_finite() && self.distance_km > 0.0
    }
}

/// Concurrency and timeout policy of a batch fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Maximum number of origins in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Time budget for one origin, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_concurrency() -> usize {
    4
}

const fn default_timeout_ms() -> u64 {
    120_000
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Endpoints of the remote index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// NLDI base URL, without trailing slash.
    #[serde(default = "default_nldi_url")]
    pub nldi_url: String,
    /// NWIS daily-values URL.
    #[serde(default = "default_nwis_dv_url")]
    pub nwis_dv_url: String,
    /// Daily statistic to request (`statCd`), e.g. `00001` for the maximum.
    #[serde(default = "default_statistic_code")]
    pub statistic_code: String,
}

fn default_nldi_url() -> String {
    DEFAULT_NLDI_URL.to_string()
}

fn default_nwis_dv_url() -> String {
    DEFAULT_NWIS_DV_URL.to_string()
}

fn default_statistic_code() -> String {
    DAILY_MEAN_STATISTIC.to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nldi_url: default_nldi_url(),
            nwis_dv_url: default_nwis_dv_url(),
            statistic_code: default_statistic_code(),
        }
    }
}

/// Flowlines and sites reached from one origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    /// Network segment the origin snapped to.
    pub comid: String,
    /// Linked monitoring sites.
    pub sites: FeatureCollection,
    /// Visited flowlines.
    pub flowlines: FeatureCollection,
}

/// Traversal of one origin of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTraversalResult {
    /// Position of the origin in the input collection.
    pub origin_index: usize,
    /// Identifier of the origin record.
    pub origin_id: String,
    /// Resolved segment, `None` if the fetch failed.
    pub comid: Option<String>,
    /// Walk direction used.
    pub mode: NavigationMode,
    /// Walk length used, in kilometres.
    pub distance_km: f64,
    /// Linked monitoring sites (EPSG:4326).
    pub sites: FeatureCollection,
    /// Visited flowlines (EPSG:4326).
    pub flowlines: FeatureCollection,
}

impl NetworkTraversalResult {
    /// The result recorded for an origin whose fetch failed.
    #[must_use]
    pub const fn empty(origin_index: usize, origin_id: String, request: &NavigationRequest) -> Self {
        Self {
            origin_index,
            origin_id,
            comid: None,
            mode: request.mode,
            distance_km: request.distance_km,
            sites: FeatureCollection::new(Crs::WGS84),
            flowlines: FeatureCollection::new(Crs::WGS84),
        }
    }

    /// Wraps a successful traversal.
    #[must_use]
    pub fn from_traversal(
        origin_index: usize,
        origin_id: String,
        request: &NavigationRequest,
        traversal: Traversal,
    ) -> Self {
        Self {
            origin_index,
            origin_id,
            comid: Some(traversal.comid),
            mode: request.mode,
            distance_km: request.distance_km,
            sites: traversal.sites,
            flowlines: traversal.flowlines,
        }
    }

    /// Returns `true` if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty() && self.flowlines.is_empty()
    }
}
