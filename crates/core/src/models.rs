//! Domain model types shared by the engine, the alias resolver, and reports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Existence result
// ---------------------------------------------------------------------------

/// Outcome of checking one (identity, source) pair.
///
/// `Error` is never folded into `NotFound` here; that coercion is a report
/// policy (see [`crate::config::ErrorPolicy`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistenceResult {
    Found,
    NotFound,
    Error(String),
}

/// The wire-level status of an [`ExistenceResult`], without the reason.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Found,
    NotFound,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found => write!(f, "found"),
            Self::NotFound => write!(f, "not_found"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl ExistenceResult {
    /// Build a result from a plain existence answer.
    pub fn from_exists(exists: bool) -> Self {
        if exists {
            Self::Found
        } else {
            Self::NotFound
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Found => Status::Found,
            Self::NotFound => Status::NotFound,
            Self::Error(_) => Status::Error,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The failure reason, for `Error` results.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }

    /// OR-combine two results for the same source.
    ///
    /// `Found` wins over everything; otherwise `Error` wins over `NotFound`.
    /// Between two errors the left-hand reason is kept.
    pub fn combine_any(&self, other: &ExistenceResult) -> ExistenceResult {
        match (self, other) {
            (Self::Found, _) | (_, Self::Found) => Self::Found,
            (Self::Error(reason), _) | (_, Self::Error(reason)) => Self::Error(reason.clone()),
            (Self::NotFound, Self::NotFound) => Self::NotFound,
        }
    }
}

impl std::fmt::Display for ExistenceResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(reason) => write!(f, "error: {}", reason),
            other => write!(f, "{}", other.status()),
        }
    }
}

/// Serializes as the bare status string (`"found"`, `"not_found"`, `"error"`).
impl Serialize for ExistenceResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.status().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Matrices
// ---------------------------------------------------------------------------

/// Results for one identity, keyed by source id.
pub type SourceResults = BTreeMap<String, ExistenceResult>;

/// identity -> source id -> result. Built fresh per verification request.
pub type ResultMatrix = BTreeMap<String, SourceResults>;

/// One row of a consolidated matrix: either an alias group or a single
/// ungrouped identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedRow {
    /// Group id for grouped rows, the identity itself otherwise.
    pub key: String,
    /// Human name of the group, if one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Identities from the input matrix folded into this row, in group order.
    pub members: Vec<String>,
    /// Whether this row comes from an alias group.
    pub grouped: bool,
    /// OR-combined result per source.
    pub results: SourceResults,
}

/// row key -> consolidated row.
pub type ConsolidatedMatrix = BTreeMap<String, ConsolidatedRow>;
