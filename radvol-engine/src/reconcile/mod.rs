//! Reconciliation comparator
//!
//! Diffs two grouped quantity multisets: committed canonical facts on
//! one side, an externally supplied reference upload on the other.
//! Output is derived, never persisted; every comparison recomputes from
//! the current facts. Equality is exact, no tolerance.

use std::collections::BTreeMap;
use std::str::FromStr;

use radvol_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::headers::canonical;
use crate::models::NormalizedRow;

/// One grouping axis over the canonical facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Client,
    Modality,
    Specialty,
    Priority,
    Category,
    ExamName,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Client,
        Dimension::Modality,
        Dimension::Specialty,
        Dimension::Priority,
        Dimension::Category,
        Dimension::ExamName,
    ];

    /// Column in `volumetria_facts` backing this dimension
    pub fn fact_column(&self) -> &'static str {
        match self {
            Dimension::Client => "client",
            Dimension::Modality => "modality",
            Dimension::Specialty => "specialty",
            Dimension::Priority => "priority",
            Dimension::Category => "category",
            Dimension::ExamName => "exam_name",
        }
    }

    /// Canonical upload field carrying this dimension
    pub fn upload_field(&self) -> &'static str {
        match self {
            Dimension::Client => canonical::CLIENT,
            Dimension::Modality => canonical::MODALITY,
            Dimension::Specialty => canonical::SPECIALTY,
            Dimension::Priority => canonical::PRIORITY,
            Dimension::Category => canonical::CATEGORY,
            Dimension::ExamName => canonical::EXAM_NAME,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.fact_column()
    }

    fn value_of(&self, row: &NormalizedRow) -> Option<String> {
        match self {
            Dimension::Client => Some(row.client.clone()),
            Dimension::Modality => row.modality.clone(),
            Dimension::Specialty => row.specialty.clone(),
            Dimension::Priority => row.priority.clone(),
            Dimension::Category => row.category.clone(),
            Dimension::ExamName => Some(row.exam_name.clone()),
        }
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown grouping dimension '{}'", s)))
    }
}

/// Grouped quantity totals keyed by dimension-value tuple
pub type GroupedCounts = BTreeMap<Vec<String>, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Key present only in the system facts
    MissingInFile,
    /// Key present only in the reference file
    MissingInSystem,
    /// Key present in both with differing quantities
    CountMismatch,
}

impl DivergenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceKind::MissingInFile => "missing_in_file",
            DivergenceKind::MissingInSystem => "missing_in_system",
            DivergenceKind::CountMismatch => "count_mismatch",
        }
    }
}

/// One divergence between the system facts and the reference file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub key: Vec<String>,
    pub kind: DivergenceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<i64>,
}

/// Full comparison result returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// The dimensions the comparison actually ran over, after wildcard
    /// reduction
    pub dimensions: Vec<Dimension>,
    pub divergences: Vec<Divergence>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.divergences.is_empty()
    }
}

/// Drop requested dimensions the reference upload does not carry.
///
/// A dimension with no value in any reference row acts as a wildcard:
/// it leaves the grouping key on both sides rather than comparing
/// system values against an all-empty column.
pub fn effective_dimensions(
    requested: &[Dimension],
    reference_rows: &[NormalizedRow],
) -> Vec<Dimension> {
    requested
        .iter()
        .copied()
        .filter(|dim| {
            reference_rows.is_empty()
                || reference_rows
                    .iter()
                    .any(|row| dim.value_of(row).is_some_and(|v| !v.trim().is_empty()))
        })
        .collect()
}

/// Group parsed reference rows into quantity totals over the dimensions
pub fn group_reference_rows(rows: &[NormalizedRow], dimensions: &[Dimension]) -> GroupedCounts {
    let mut groups = GroupedCounts::new();
    for row in rows {
        let key: Vec<String> = dimensions
            .iter()
            .map(|dim| dim.value_of(row).unwrap_or_default())
            .collect();
        *groups.entry(key).or_insert(0) += row.quantity;
    }
    groups
}

/// Compare two grouped multisets.
///
/// Walks the ordered union of both key sets, so output order is
/// deterministic regardless of input arrival order. Two empty inputs
/// produce an empty output; identical inputs produce an empty output.
pub fn compare(system: &GroupedCounts, file: &GroupedCounts) -> Vec<Divergence> {
    let mut divergences = Vec::new();

    let mut keys: Vec<&Vec<String>> = system.keys().chain(file.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        match (system.get(key), file.get(key)) {
            (Some(sys), Some(fil)) if sys == fil => {}
            (Some(sys), Some(fil)) => divergences.push(Divergence {
                key: key.clone(),
                kind: DivergenceKind::CountMismatch,
                system_count: Some(*sys),
                file_count: Some(*fil),
            }),
            (Some(sys), None) => divergences.push(Divergence {
                key: key.clone(),
                kind: DivergenceKind::MissingInFile,
                system_count: Some(*sys),
                file_count: None,
            }),
            (None, Some(fil)) => divergences.push(Divergence {
                key: key.clone(),
                kind: DivergenceKind::MissingInSystem,
                system_count: None,
                file_count: Some(*fil),
            }),
            (None, None) => unreachable!("key came from one of the two maps"),
        }
    }

    divergences
}

/// One row per divergence: grouping key fields, kind, both counts
pub fn export_csv(report: &ReconciliationReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = report.dimensions.iter().map(|d| d.as_str()).collect();
    header.extend(["kind", "system_count", "file_count"]);
    writer
        .write_record(&header)
        .map_err(|e| Error::Internal(format!("Reconciliation export failed: {}", e)))?;

    for div in &report.divergences {
        let mut record: Vec<String> = div.key.clone();
        record.push(div.kind.as_str().to_string());
        record.push(div.system_count.map(|c| c.to_string()).unwrap_or_default());
        record.push(div.file_count.map(|c| c.to_string()).unwrap_or_default());
        writer
            .write_record(&record)
            .map_err(|e| Error::Internal(format!("Reconciliation export failed: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("Reconciliation export failed: {}", e)))
}
