#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Gap-aware daily series normalization.
//!
//! Each `(site, parameter)` series is expanded to every calendar day
//! between its first and last observation. Inserted days carry no value
//! and are flagged as not observed, so a plot of the result breaks at the
//! gap instead of drawing a line across it. Only metadata is carried
//! forward into gaps; measurements are never invented.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{Days, NaiveDate};
use hydro_map_series_models::{SeriesKey, SeriesRow, TimeSeriesRecord};

/// Errors that can occur while writing normalized series.
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    /// CSV serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalizes records onto a contiguous daily grid per series.
///
/// Output is ordered by site, parameter, then date. When a series has
/// several records for the same day, the first one in input order wins.
#[must_use]
pub fn normalize(records: &[TimeSeriesRecord]) -> Vec<SeriesRow> {
    let mut groups: BTreeMap<SeriesKey, BTreeMap<NaiveDate, &TimeSeriesRecord>> = BTreeMap::new();
    let mut duplicates = 0usize;

    for record in records {
        let days = groups.entry(SeriesKey::of(record)).or_default();
        if days.contains_key(&record.date) {
            duplicates += 1;
            log::debug!(
                "Ignoring duplicate observation for {} {} on {}",
                record.site_id,
                record.parameter_code,
                record.date
            );
        } else {
            days.insert(record.date, record);
        }
    }

    if duplicates > 0 {
        log::warn!("Ignored {duplicates} duplicate daily observations");
    }

    let mut rows = Vec::new();
    let mut inserted = 0usize;

    for (key, days) in &groups {
        let (Some((&first, _)), Some((&last, _))) =
            (days.first_key_value(), days.last_key_value())
        else {
            continue;
        };

        let mut metadata = BTreeMap::new();
        let mut date = first;

        loop {
            if let Some(record) = days.get(&date) {
                metadata.clone_from(&record.metadata);
                rows.push(SeriesRow {
                    site_id: key.site_id.clone(),
                    parameter_code: key.parameter_code.clone(),
                    date,
                    value: record.value,
                    observed: true,
                    metadata: record.metadata.clone(),
                });
            } else {
                inserted += 1;
                rows.push(SeriesRow {
                    site_id: key.site_id.clone(),
                    parameter_code: key.parameter_code.clone(),
                    date,
                    value: None,
                    observed: false,
                    metadata: metadata.clone(),
                });
            }

            if date >= last {
                break;
            }
            let Some(next) = date.checked_add_days(Days::new(1)) else {
                break;
            };
            date = next;
        }
    }

    log::info!(
        "Normalized {} records into {} series ({} rows, {inserted} gap days)",
        records.len(),
        groups.len(),
        rows.len()
    );

    rows
}

/// Writes normalized rows as CSV.
///
/// Columns are `site_id, parameter_code, date, value, observed` followed by
/// every metadata key present in any row, sorted. Missing values are
/// written as empty cells.
///
/// # Errors
///
/// Returns [`SeriesError`] if the file cannot be created or written.
pub fn write_csv(rows: &[SeriesRow], path: &Path) -> Result<(), SeriesError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let metadata_keys: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.metadata.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["site_id", "parameter_code", "date", "value", "observed"];
    header.extend(metadata_keys.iter().copied());
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.site_id.clone(),
            row.parameter_code.clone(),
            row.date.format("%Y-%m-%d").to_string(),
            row.value.map(|v| v.to_string()).unwrap_or_default(),
            row.observed.to_string(),
        ];
        record.extend(
            metadata_keys
                .iter()
                .map(|k| row.metadata.get(*k).cloned().unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    log::info!("Wrote {} series rows to {}", rows.len(), path.display());

    Ok(())
}
