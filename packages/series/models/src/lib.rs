#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Daily observation types.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// USGS parameter code for discharge, cubic feet per second.
pub const DISCHARGE: &str = "00060";
/// USGS parameter code for water temperature, degrees Celsius.
pub const WATER_TEMPERATURE: &str = "00010";

/// One daily observation as returned by a remote index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    /// Site identifier without agency prefix (e.g. `"01646500"`).
    pub site_id: String,
    /// Observation day.
    pub date: NaiveDate,
    /// Parameter code (e.g. `"00060"`).
    pub parameter_code: String,
    /// Measured value, `None` when the service reported no data.
    pub value: Option<f64>,
    /// Categorical metadata such as qualifiers and units.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TimeSeriesRecord {
    /// Creates a record with no metadata.
    #[must_use]
    pub fn new(
        site_id: impl Into<String>,
        date: NaiveDate,
        parameter_code: impl Into<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            date,
            parameter_code: parameter_code.into(),
            value,
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style metadata setter.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Identifies one independent series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Site identifier.
    pub site_id: String,
    /// Parameter code.
    pub parameter_code: String,
}

impl SeriesKey {
    /// Key of a record.
    #[must_use]
    pub fn of(record: &TimeSeriesRecord) -> Self {
        Self {
            site_id: record.site_id.clone(),
            parameter_code: record.parameter_code.clone(),
        }
    }
}

/// One day of a normalized series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    /// Site identifier.
    pub site_id: String,
    /// Parameter code.
    pub parameter_code: String,
    /// Calendar day.
    pub date: NaiveDate,
    /// Measured value. Never filled for inserted days.
    pub value: Option<f64>,
    /// `false` for days inserted to close a gap.
    pub observed: bool,
    /// Metadata observed that day, or carried forward from the latest
    /// observed day of the same series.
    pub metadata: BTreeMap<String, String>,
}

impl SeriesRow {
    /// Key of the series this row belongs to.
    #[must_use]
    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            site_id: self.site_id.clone(),
            parameter_code: self.parameter_code.clone(),
        }
    }
}
