//! Exclusion ledger types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical rejection/exclusion motive codes
///
/// Row-level motives never abort a batch; `StorageFailure` is the only
/// batch-fatal member and is recorded on the batch, not on rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotiveCode {
    /// Client or patient identifier absent; rejected pre-staging
    MissingRequiredField,
    /// Date/time/numeric field failed to parse; field nulled, row kept
    ParseError,
    /// Reference-table lookup failed; rule skipped for the row
    LookupMiss,
    /// Realization/report timestamp outside the allowed billing window
    TemporalExclusion,
    /// Blob storage or database unreachable; aborts the whole batch
    StorageFailure,
    /// Rule panicked or hit an invariant break; row left unmodified
    RuleInternalError,
    /// Staging row with no corresponding fact, found by the
    /// reconciliation fallback after a mid-batch crash
    ProcessingGap,
}

impl MotiveCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingRequiredField => "missing_required_field",
            Self::ParseError => "parse_error",
            Self::LookupMiss => "lookup_miss",
            Self::TemporalExclusion => "temporal_exclusion",
            Self::StorageFailure => "storage_failure",
            Self::RuleInternalError => "rule_internal_error",
            Self::ProcessingGap => "processing_gap",
        }
    }
}

impl std::str::FromStr for MotiveCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing_required_field" => Ok(Self::MissingRequiredField),
            "parse_error" => Ok(Self::ParseError),
            "lookup_miss" => Ok(Self::LookupMiss),
            "temporal_exclusion" => Ok(Self::TemporalExclusion),
            "storage_failure" => Ok(Self::StorageFailure),
            "rule_internal_error" => Ok(Self::RuleInternalError),
            "processing_gap" => Ok(Self::ProcessingGap),
            other => Err(format!("unknown motive code: {}", other)),
        }
    }
}

impl std::fmt::Display for MotiveCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One excluded row. Immutable once written; corrections are new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub id: i64,
    pub source_file: String,
    pub row_ordinal: u64,
    /// Full original payload, preserved verbatim
    pub payload: serde_json::Value,
    pub motive: MotiveCode,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Terminal exclusion state for a batch
///
/// `Clean` ("zero exclusions, fully processed") is distinguishable from
/// `NotComputed` (batch not yet terminal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExclusionSummary {
    NotComputed,
    Clean,
    Excluded { count: u64 },
}
