//! Read-only reference tables
//!
//! Loaded once per batch into an immutable `ReferenceData` passed by
//! reference into the rule engine. No shared mutable caches across
//! concurrent batches.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// De-para mapping: exam name → non-zero reference value for backfill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeParaMapping {
    pub exam_name: String,
    pub reference_value: f64,
}

/// One derived allocation of a compound exam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamBreakRule {
    pub source_exam: String,
    /// Suffix appended to the fact derivation key; keeps splits idempotent
    pub derived_suffix: String,
    pub target_category: String,
    /// Share of the parent value allocated to this derivation
    pub value_share: f64,
}

/// Canonical exam registry entry: authoritative specialty/category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRegistryEntry {
    pub exam_name: String,
    pub specialty: String,
    pub category: String,
}

/// Tiered price row consumed by the pricing resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    pub id: i64,
    pub client: String,
    pub modality: String,
    pub specialty: String,
    pub category: String,
    pub priority: String,
    pub volume_from: i64,
    pub volume_to: i64,
    pub base_price: f64,
    pub urgency_price: f64,
}

/// Currently allowed billing window for temporal-validity exclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingWindow {
    /// First day of the billable period
    pub period_start: NaiveDate,
    /// Report dates after this cutoff are excluded
    pub report_cutoff: NaiveDate,
}

impl BillingWindow {
    /// Window for the calendar month containing `today`
    pub fn for_month(today: NaiveDate) -> Self {
        let period_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
            .unwrap_or(today);
        let report_cutoff = if today.month() == 12 {
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
        }
        .map(|d| d.pred_opt().unwrap_or(d))
        .unwrap_or(today);

        Self {
            period_start,
            report_cutoff,
        }
    }
}

/// All reference tables for one batch run, keyed for O(1) rule lookups
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// exam name → reference value
    pub depara: HashMap<String, f64>,
    /// source exam → derived allocations
    pub break_rules: HashMap<String, Vec<ExamBreakRule>>,
    /// exam name → registry entry
    pub registry: HashMap<String, ExamRegistryEntry>,
    /// normalized physician name → specialty
    pub roster: HashMap<String, String>,
    pub billing_window: Option<BillingWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_window_covers_calendar_month() {
        let window = BillingWindow::for_month(NaiveDate::from_ymd_opt(2024, 2, 14).unwrap());
        assert_eq!(window.period_start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(window.report_cutoff, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn billing_window_handles_december() {
        let window = BillingWindow::for_month(NaiveDate::from_ymd_opt(2023, 12, 5).unwrap());
        assert_eq!(window.report_cutoff, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }
}
