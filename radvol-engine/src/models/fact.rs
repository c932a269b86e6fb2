//! Canonical committed exam-volume record

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A committed, rule-processed exam-volume record ready for billing.
///
/// Natural identity is (client, patient, exam_name, derivation, batch_id);
/// writes are upserts on that key so re-running a batch never duplicates
/// facts. `derivation` is empty for plain rows and carries the break-rule
/// suffix for split allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumetriaFact {
    pub client: String,
    pub patient: String,
    pub exam_name: String,
    pub derivation: String,
    pub batch_id: Uuid,
    pub modality: Option<String>,
    pub specialty: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub physician: Option<String>,
    pub quantity: i64,
    pub value: f64,
    pub realized_at: Option<NaiveDateTime>,
    pub reported_at: Option<NaiveDateTime>,
}
