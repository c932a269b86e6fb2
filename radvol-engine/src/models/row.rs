//! Parsed upload row types
//!
//! The ingestion parser turns one raw spreadsheet row into exactly one of
//! `NormalizedRow` or `RejectedRow`; it never panics on malformed input.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::MotiveCode;

/// Typed, validated upload row ready for staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    /// Billing client identifier (mandatory)
    pub client: String,
    /// Patient name or accession identifier (mandatory)
    pub patient: String,
    pub exam_name: String,
    pub modality: Option<String>,
    pub specialty: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub physician: Option<String>,
    /// Fractional exam counts are not meaningful; always truncated
    pub quantity: i64,
    pub value: f64,
    pub realized_date: Option<NaiveDate>,
    pub realized_time: Option<NaiveTime>,
    pub reported_date: Option<NaiveDate>,
    pub reported_time: Option<NaiveTime>,
    /// Field-level parse problems that nulled a field but kept the row
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_notes: Vec<String>,
}

/// Row rejected before staging, carrying the original payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 0-based ordinal of the row within the source file
    pub ordinal: u64,
    /// Original key→value payload, preserved verbatim
    pub payload: serde_json::Value,
    pub motive: MotiveCode,
    pub detail: String,
}

/// Parser output: exactly one of these per raw row
#[derive(Debug, Clone)]
pub enum ParsedRow {
    Normalized(Box<NormalizedRow>),
    Rejected(Box<RejectedRow>),
}
