//! Result types for spatial joins and distance queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{FeatureCollection, LinearUnit};

/// Which input collection a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordRole {
    /// Record being filtered.
    Subject,
    /// Record of the filtering boundary.
    Boundary,
    /// Left side of a join.
    Left,
    /// Right side of a join.
    Right,
    /// Query point of a distance search.
    Query,
    /// Candidate point of a distance search.
    Candidate,
}

impl fmt::Display for RecordRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Subject => "subject",
            Self::Boundary => "boundary",
            Self::Left => "left",
            Self::Right => "right",
            Self::Query => "query",
            Self::Candidate => "candidate",
        })
    }
}

/// Why a single record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The geometry failed validation.
    InvalidGeometry,
    /// The geometry type is not supported by the operation.
    UnsupportedGeometry,
}

/// A record that was skipped without aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Which input the record belongs to.
    pub role: RecordRole,
    /// Position of the record in its input collection.
    pub index: usize,
    /// Record identifier.
    pub id: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} record #{} ({}): {:?}: {}",
            self.role, self.index, self.id, self.kind, self.message
        )
    }
}

/// Whether unmatched left records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Drop left records with no match.
    #[default]
    Inner,
    /// Keep unmatched left records with null right-side attributes.
    Left,
}

/// How many right matches a left record may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One row per match.
    #[default]
    OneToMany,
    /// Only the lowest-index match is kept.
    OneToOne,
}

/// Join policy, always stated per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinOptions {
    /// Inner or left join.
    #[serde(default)]
    pub kind: JoinKind,
    /// One-to-many or one-to-one.
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl JoinOptions {
    /// Inner, one-to-many.
    #[must_use]
    pub const fn inner() -> Self {
        Self {
            kind: JoinKind::Inner,
            cardinality: Cardinality::OneToMany,
        }
    }

    /// Left, one-to-many.
    #[must_use]
    pub const fn left() -> Self {
        Self {
            kind: JoinKind::Left,
            cardinality: Cardinality::OneToMany,
        }
    }

    /// Returns a copy with the given cardinality.
    #[must_use]
    pub const fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }
}

/// Source indices of one joined row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPair {
    /// Index into the left collection.
    pub left: usize,
    /// Index into the right collection, `None` for unmatched left rows.
    pub right: Option<usize>,
}

/// Joined rows plus provenance and per-record failures.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResult {
    /// Joined rows with left geometry and merged attributes.
    pub collection: FeatureCollection,
    /// One entry per row of `collection`.
    pub pairs: Vec<JoinPair>,
    /// Policy used to build the rows.
    pub options: JoinOptions,
    /// Records skipped during the join.
    pub failures: Vec<RecordFailure>,
}

impl JoinResult {
    /// Number of joined rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if no rows were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Distance between a query record and a candidate record.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMeasurement {
    /// Query record identifier.
    pub query_id: String,
    /// Candidate record identifier.
    pub candidate_id: String,
    /// Index of the query record.
    pub query_index: usize,
    /// Index of the candidate record.
    pub candidate_index: usize,
    /// Distance in `unit`.
    pub distance: f64,
    /// Unit of `distance`.
    pub unit: LinearUnit,
}

impl DistanceMeasurement {
    /// Returns the distance expressed in `unit`.
    #[must_use]
    pub fn in_unit(&self, unit: LinearUnit) -> f64 {
        self.unit.convert(self.distance, unit)
    }
}
