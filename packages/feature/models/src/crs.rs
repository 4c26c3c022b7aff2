//! Coordinate reference system identifiers and their units.
//!
//! A [`Crs`] is only an identifier. Reprojection lives in `hydro_map_crs`;
//! this module answers the cheaper questions every stage needs: are two
//! collections in the same CRS, and does a CRS measure in degrees or in a
//! linear unit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A coordinate reference system identifier.
///
/// Deserializes from strings such as `"EPSG:5070"`, `"4326"`,
/// `"urn:ogc:def:crs:EPSG::26918"`, a `+proj=` string or WKT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// An EPSG registry code.
    Epsg(u32),
    /// A PROJ string or WKT definition.
    Definition(String),
}

impl Crs {
    /// WGS 84 geographic coordinates (longitude/latitude order).
    pub const WGS84: Self = Self::Epsg(4326);

    /// Returns the identifier PROJ accepts for this CRS.
    #[must_use]
    pub fn proj_identifier(&self) -> String {
        self.to_string()
    }

    /// Classifies the CRS units, or `None` when they cannot be determined
    /// without consulting PROJ.
    #[must_use]
    pub fn units(&self) -> Option<CrsUnits> {
        match self {
            Self::Epsg(code) => epsg_units(*code),
            Self::Definition(def) => definition_units(def),
        }
    }

    /// Returns `true` if coordinates are angular (degrees).
    #[must_use]
    pub fn is_geographic(&self) -> bool {
        matches!(self.units(), Some(CrsUnits::Angular))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epsg(code) => write!(f, "EPSG:{code}"),
            Self::Definition(def) => f.write_str(def),
        }
    }
}

/// Errors from parsing a [`Crs`] identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrsParseError {
    /// The identifier was empty.
    #[error("CRS identifier is empty")]
    Empty,

    /// The EPSG code was not a positive integer.
    #[error("Invalid EPSG code: {0}")]
    InvalidCode(String),
}

impl FromStr for Crs {
    type Err = CrsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CrsParseError::Empty);
        }

        let upper = trimmed.to_ascii_uppercase();

        if upper == "CRS84" || (upper.starts_with("URN:OGC:DEF:CRS:OGC") && upper.ends_with("CRS84"))
        {
            return Ok(Self::WGS84);
        }

        if let Some(code) = upper.strip_prefix("EPSG:") {
            return parse_epsg_code(code);
        }

        // urn:ogc:def:crs:EPSG::4326 and urn:ogc:def:crs:EPSG:6.6:4326
        if let Some(rest) = upper.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
            let code = rest.rsplit(':').next().unwrap_or_default();
            return parse_epsg_code(code);
        }

        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            return parse_epsg_code(trimmed);
        }

        Ok(Self::Definition(trimmed.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

fn parse_epsg_code(code: &str) -> Result<Crs, CrsParseError> {
    match code.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(Crs::Epsg(n)),
        _ => Err(CrsParseError::InvalidCode(code.to_string())),
    }
}

/// Whether a CRS measures in degrees or in a linear unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsUnits {
    /// Geographic coordinates in degrees.
    Angular,
    /// Projected coordinates in the given unit.
    Linear(LinearUnit),
}

/// A unit of linear distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearUnit {
    /// SI metre.
    Metre,
    /// 1000 metres.
    Kilometre,
    /// International foot (0.3048 m).
    Foot,
    /// US survey foot (1200/3937 m).
    UsSurveyFoot,
    /// International mile (1609.344 m).
    Mile,
}

impl LinearUnit {
    /// Length of one unit in metres.
    #[must_use]
    pub const fn metres_per_unit(self) -> f64 {
        match self {
            Self::Metre => 1.0,
            Self::Kilometre => 1000.0,
            Self::Foot => 0.3048,
            Self::UsSurveyFoot => 1200.0 / 3937.0,
            Self::Mile => 1609.344,
        }
    }

    /// Converts `value` expressed in `self` into `to`.
    #[must_use]
    pub fn convert(self, value: f64, to: Self) -> f64 {
        if self == to {
            return value;
        }
        value * self.metres_per_unit() / to.metres_per_unit()
    }

    /// Short unit symbol (e.g. `"m"`).
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Metre => "m",
            Self::Kilometre => "km",
            Self::Foot => "ft",
            Self::UsSurveyFoot => "us-ft",
            Self::Mile => "mi",
        }
    }
}

impl fmt::Display for LinearUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Geographic (degree-based) EPSG codes in common use for North American
/// and European data.
const GEOGRAPHIC_EPSG: &[u32] = &[
    4019, 4148, 4230, 4258, 4267, 4269, 4283, 4322, 4326, 4612, 4617, 4674, 4759, 4979, 6318,
    7844,
];

/// Projected EPSG codes measured in metres (outside the UTM ranges below).
const METRE_EPSG: &[u32] = &[
    2154, 2163, 2193, 3005, 3035, 3310, 3338, 3395, 3577, 3857, 5070, 5071, 5072, 6350, 6933,
    27700, 28355,
];

/// Projected EPSG codes measured in US survey feet.
const US_FOOT_EPSG: &[u32] = &[2227, 2229, 2263, 2272, 2283, 2285, 3435];

/// Projected EPSG codes measured in international feet.
const FOOT_EPSG: &[u32] = &[2992];

fn epsg_units(code: u32) -> Option<CrsUnits> {
    let utm = matches!(
        code,
        25828..=25838 | 26701..=26722 | 26901..=26923 | 32601..=32660 | 32701..=32760
    );

    if GEOGRAPHIC_EPSG.contains(&code) {
        Some(CrsUnits::Angular)
    } else if utm || METRE_EPSG.contains(&code) {
        Some(CrsUnits::Linear(LinearUnit::Metre))
    } else if US_FOOT_EPSG.contains(&code) {
        Some(CrsUnits::Linear(LinearUnit::UsSurveyFoot))
    } else if FOOT_EPSG.contains(&code) {
        Some(CrsUnits::Linear(LinearUnit::Foot))
    } else {
        None
    }
}

fn definition_units(def: &str) -> Option<CrsUnits> {
    let trimmed = def.trim();
    if trimmed.starts_with('+') || trimmed.contains("+proj=") {
        proj_string_units(trimmed)
    } else {
        wkt_units(trimmed)
    }
}

fn proj_string_units(def: &str) -> Option<CrsUnits> {
    let mut projection = None;
    let mut units = None;

    for token in def.split_whitespace() {
        let token = token.trim_start_matches('+');
        let (key, value) = token.split_once('=').unwrap_or((token, ""));
        match key {
            "proj" => projection = Some(value),
            "units" => units = Some(value),
            _ => {}
        }
    }

    match projection? {
        "longlat" | "latlong" | "lonlat" | "latlon" => Some(CrsUnits::Angular),
        _ => match units.unwrap_or("m") {
            "m" => Some(CrsUnits::Linear(LinearUnit::Metre)),
            "km" => Some(CrsUnits::Linear(LinearUnit::Kilometre)),
            "ft" => Some(CrsUnits::Linear(LinearUnit::Foot)),
            "us-ft" => Some(CrsUnits::Linear(LinearUnit::UsSurveyFoot)),
            "mi" => Some(CrsUnits::Linear(LinearUnit::Mile)),
            other => {
                log::debug!("Unrecognized PROJ units '{other}'");
                None
            }
        },
    }
}

fn wkt_units(def: &str) -> Option<CrsUnits> {
    let upper = def.to_ascii_uppercase();

    if upper.starts_with("GEOGCS[") || upper.starts_with("GEOGCRS[") || upper.starts_with("GEODCRS[")
    {
        return Some(CrsUnits::Angular);
    }

    if !(upper.starts_with("PROJCS[") || upper.starts_with("PROJCRS[")) {
        return None;
    }

    // The projected unit is the last UNIT in a WKT1 PROJCS (and the
    // last LENGTHUNIT in WKT2).
    let start = upper.rfind("UNIT[")? + "UNIT[".len();
    let name = upper[start..].split(',').next()?.trim().trim_matches('"');

    let unit = if name.contains("FOOT") || name.contains("FEET") || name.contains("FT") {
        if name.contains("US") {
            LinearUnit::UsSurveyFoot
        } else {
            LinearUnit::Foot
        }
    } else if name.contains("KILOMET") {
        LinearUnit::Kilometre
    } else if name.contains("MET") {
        LinearUnit::Metre
    } else {
        return None;
    };

    Some(CrsUnits::Linear(unit))
}
