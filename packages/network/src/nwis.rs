//! NWIS daily-values (`dv`) JSON parsing.
//!
//! The service answers in WaterML-as-JSON: one `timeSeries` entry per
//! site and parameter, each with a list of `{value, qualifiers, dateTime}`
//! points. Values are strings, and missing days are either absent or carry
//! the series' `noDataValue`.

use chrono::NaiveDate;
use hydro_map_series_models::TimeSeriesRecord;
use serde::Deserialize;

use crate::FetchError;

/// Agency prefix NLDI puts in front of NWIS site numbers.
pub const USGS_PREFIX: &str = "USGS-";

/// Sentinel NWIS uses when a series declares no `noDataValue`.
const DEFAULT_NO_DATA: f64 = -999_999.0;

#[derive(Debug, Deserialize)]
struct Response {
    value: ResponseValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseValue {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeries {
    source_info: SourceInfo,
    variable: Variable,
    #[serde(default)]
    values: Vec<ValueBlock>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceInfo {
    #[serde(default)]
    site_name: Option<String>,
    site_code: Vec<CodeValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Variable {
    variable_code: Vec<CodeValue>,
    #[serde(default)]
    no_data_value: Option<f64>,
    #[serde(default)]
    unit: Option<Unit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Unit {
    #[serde(default)]
    unit_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ValueBlock {
    #[serde(default)]
    value: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Observation {
    value: String,
    #[serde(default)]
    qualifiers: Vec<String>,
    date_time: String,
}

/// Removes the `USGS-` agency prefix, if present.
#[must_use]
pub fn strip_agency(site: &str) -> &str {
    site.strip_prefix(USGS_PREFIX).unwrap_or(site)
}

/// Parses a `dv` response body into daily records.
///
/// Only series of `statistic` (an NWIS `statCd`, e.g. `00003`) are kept,
/// since each statistic yields its own record for the same site, parameter
/// and day. Series whose name carries no statistic are kept.
///
/// # Errors
///
/// Returns [`FetchError::Json`] if the document does not have the
/// expected shape and [`FetchError::Parse`] for an unreadable date.
pub fn parse_daily_values(
    body: serde_json::Value,
    statistic: &str,
) -> Result<Vec<TimeSeriesRecord>, FetchError> {
    let response: Response = serde_json::from_value(body)?;
    let mut records = Vec::new();

    for series in response.value.time_series {
        let Some(site) = series.source_info.site_code.first() else {
            log::warn!("Skipping time series without a site code");
            continue;
        };
        let Some(parameter) = series.variable.variable_code.first() else {
            log::warn!("Skipping time series for {} without a parameter code", site.value);
            continue;
        };

        let no_data = series.variable.no_data_value.unwrap_or(DEFAULT_NO_DATA);
        let unit = series.variable.unit.and_then(|u| u.unit_code);
        // USGS:01646500:00060:00003 -> statistic code 00003 (daily mean)
        let statistic_code = series
            .name
            .as_deref()
            .and_then(|n| n.split(':').nth(3))
            .map(str::to_string);

        if let Some(code) = statistic_code.as_deref().filter(|code| *code != statistic) {
            log::debug!("Skipping statistic {code} for {}", site.value);
            continue;
        }

        for observation in series.values.into_iter().flat_map(|b| b.value) {
            let date = parse_day(&observation.date_time)?;
            let value = observation
                .value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && (*v - no_data).abs() > f64::EPSILON);

            let mut record =
                TimeSeriesRecord::new(strip_agency(&site.value), date, &parameter.value, value);

            if !observation.qualifiers.is_empty() {
                record = record.with_metadata("qualifiers", observation.qualifiers.join(","));
            }
            if let Some(name) = &series.source_info.site_name {
                record = record.with_metadata("site_name", name.clone());
            }
            if let Some(unit) = &unit {
                record = record.with_metadata("unit", unit.clone());
            }
            if let Some(code) = &statistic_code {
                record = record.with_metadata("statistic", code.clone());
            }

            records.push(record);
        }
    }

    Ok(records)
}

fn parse_day(date_time: &str) -> Result<NaiveDate, FetchError> {
    let day = date_time.get(..10).unwrap_or(date_time);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| FetchError::Parse {
        message: format!("bad dateTime '{date_time}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DV_RESPONSE: &str = r#"{
        "name": "ns1:timeSeriesResponseType",
        "value": {
            "queryInfo": {"queryURL": "http://waterservices.usgs.gov/nwis/dv/"},
            "timeSeries": [
                {
                    "sourceInfo": {
                        "siteName": "POTOMAC RIVER NEAR WASH, DC LITTLE FALLS PUMP STA",
                        "siteCode": [{"value": "01646500", "network": "NWIS", "agencyCode": "USGS"}]
                    },
                    "variable": {
                        "variableCode": [{"value": "00060", "network": "NWIS", "vocabulary": "NWIS:UnitValues"}],
                        "unit": {"unitCode": "ft3/s"},
                        "noDataValue": -999999.0
                    },
                    "values": [{
                        "value": [
                            {"value": "4210", "qualifiers": ["A"], "dateTime": "2024-06-01T00:00:00.000"},
                            {"value": "-999999", "qualifiers": ["A", "Ice"], "dateTime": "2024-06-02T00:00:00.000"},
                            {"value": "3980", "qualifiers": ["P"], "dateTime": "2024-06-05T00:00:00.000"}
                        ]
                    }],
                    "name": "USGS:01646500:00060:00003"
                },
                {
                    "sourceInfo": {"siteCode": [{"value": "01594440"}]},
                    "variable": {"variableCode": [{"value": "00060"}]},
                    "values": [{"value": []}],
                    "name": "USGS:01594440:00060:00003"
                }
            ]
        }
    }"#;

    #[test]
    fn parses_daily_values_and_maps_no_data() {
        let body: serde_json::Value = serde_json::from_str(DV_RESPONSE).unwrap();
        let records = parse_daily_values(body, "00003").unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.site_id == "01646500"));

        assert_eq!(records[0].value, Some(4210.0));
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(records[0].metadata["qualifiers"], "A");
        assert_eq!(records[0].metadata["unit"], "ft3/s");
        assert_eq!(records[0].metadata["statistic"], "00003");

        assert_eq!(records[1].value, None);
        assert_eq!(records[1].metadata["qualifiers"], "A,Ice");

        assert_eq!(records[2].date, NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
    }

    #[test]
    fn empty_response_has_no_records() {
        let body = serde_json::json!({"value": {"timeSeries": []}});
        assert!(parse_daily_values(body, "00003").unwrap().is_empty());
    }

    #[test]
    fn rejects_unexpected_shape() {
        let body = serde_json::json!({"error": "nope"});
        assert!(matches!(parse_daily_values(body, "00003"), Err(FetchError::Json(_))));
    }

    fn two_statistics() -> serde_json::Value {
        let series = |statistic: &str, value: &str| {
            serde_json::json!({
                "sourceInfo": {"siteCode": [{"value": "01646500"}]},
                "variable": {"variableCode": [{"value": "00060"}], "noDataValue": -999999.0},
                "values": [{"value": [
                    {"value": value, "qualifiers": ["A"], "dateTime": "2024-06-01T00:00:00.000"}
                ]}],
                "name": format!("USGS:01646500:00060:{statistic}")
            })
        };
        serde_json::json!({"value": {"timeSeries": [
            series("00001", "9000"),
            series("00003", "4210"),
        ]}})
    }

    #[test]
    fn keeps_only_the_requested_statistic() {
        let records = parse_daily_values(two_statistics(), "00003").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Some(4210.0));
        assert_eq!(records[0].metadata["statistic"], "00003");

        let rows = hydro_map_series::normalize(&records);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(4210.0));

        let maxima = parse_daily_values(two_statistics(), "00001").unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].value, Some(9000.0));
    }

    #[test]
    fn strips_agency_prefix() {
        assert_eq!(strip_agency("USGS-01646500"), "01646500");
        assert_eq!(strip_agency("01646500"), "01646500");
    }
}
