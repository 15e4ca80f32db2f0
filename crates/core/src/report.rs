//! Report models: the consolidated matrix as handed to the CLI (or any other
//! front end), plus per-source aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ErrorPolicy;
use crate::models::{ConsolidatedMatrix, ExistenceResult, Status};
use crate::registry::ExcludedSource;

/// One report column.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceColumn {
    pub id: String,
    pub display_name: String,
    pub enumerable: bool,
}

/// One cell: the status plus, for errors, the reason.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResultCell {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&ExistenceResult> for ResultCell {
    fn from(result: &ExistenceResult) -> Self {
        Self {
            status: result.status(),
            reason: result.reason().map(String::from),
        }
    }
}

/// One report row: an alias group or a single identity.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportRow {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub members: Vec<String>,
    pub grouped: bool,
    pub results: BTreeMap<String, ResultCell>,
}

impl ReportRow {
    pub fn status(&self, source_id: &str) -> Option<Status> {
        self.results.get(source_id).map(|c| c.status)
    }
}

/// Per-source aggregates over the report rows.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SourceCounts {
    /// Identities the source listed, when it was enumerated successfully.
    pub enumerated: Option<usize>,
    pub found: usize,
    pub not_found: usize,
    pub errors: usize,
}

/// Everything a front end needs to render a verification or comparison.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    /// Columns, in registry order.
    pub sources: Vec<SourceColumn>,
    /// Rows, ordered by key.
    pub rows: Vec<ReportRow>,
    pub source_counts: BTreeMap<String, SourceCounts>,
    /// Enumerable sources whose listing failed: source id -> reason.
    pub enumeration_failures: BTreeMap<String, String>,
    /// Configured sources left out at registration.
    pub excluded_sources: Vec<ExcludedSource>,
    /// Distinct identities checked before consolidation.
    pub identity_count: usize,
    pub error_policy: ErrorPolicy,
    /// Error cells rewritten to `not_found` by the policy.
    pub errors_coerced: usize,
}

/// Inputs besides the consolidated matrix that go into a [`Report`].
#[derive(Debug, Default)]
pub(crate) struct ReportContext {
    pub sources: Vec<SourceColumn>,
    pub enumerated: BTreeMap<String, usize>,
    pub enumeration_failures: BTreeMap<String, String>,
    pub excluded_sources: Vec<ExcludedSource>,
    pub identity_count: usize,
}

impl Report {
    pub(crate) fn build(
        consolidated: ConsolidatedMatrix,
        context: ReportContext,
        policy: ErrorPolicy,
    ) -> Self {
        let mut errors_coerced = 0;
        let mut source_counts: BTreeMap<String, SourceCounts> = context
            .sources
            .iter()
            .map(|s| {
                let counts = SourceCounts {
                    enumerated: context.enumerated.get(&s.id).copied(),
                    ..Default::default()
                };
                (s.id.clone(), counts)
            })
            .collect();

        let rows: Vec<ReportRow> = consolidated
            .into_values()
            .map(|row| {
                let results = row
                    .results
                    .iter()
                    .map(|(source, result)| {
                        let mut cell = ResultCell::from(result);
                        if cell.status == Status::Error && policy == ErrorPolicy::TreatAsNotFound {
                            cell = ResultCell {
                                status: Status::NotFound,
                                reason: None,
                            };
                            errors_coerced += 1;
                        }
                        let counts = source_counts.entry(source.clone()).or_default();
                        match cell.status {
                            Status::Found => counts.found += 1,
                            Status::NotFound => counts.not_found += 1,
                            Status::Error => counts.errors += 1,
                        }
                        (source.clone(), cell)
                    })
                    .collect();
                ReportRow {
                    key: row.key,
                    display_name: row.display_name,
                    members: row.members,
                    grouped: row.grouped,
                    results,
                }
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            sources: context.sources,
            rows,
            source_counts,
            enumeration_failures: context.enumeration_failures,
            excluded_sources: context.excluded_sources,
            identity_count: context.identity_count,
            error_policy: policy,
            errors_coerced,
        }
    }

    pub fn row(&self, key: &str) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn counts(&self, source_id: &str) -> Option<&SourceCounts> {
        self.source_counts.get(source_id)
    }

    /// Error cells left in the report after the policy was applied.
    pub fn error_count(&self) -> usize {
        self.source_counts.values().map(|c| c.errors).sum()
    }
}
