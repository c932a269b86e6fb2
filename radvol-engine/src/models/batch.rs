//! Staging batch state machine
//!
//! A batch progresses `pendente → processando → concluido | erro`, with
//! `cancelado` as the cooperative-cancellation terminal state. Row-level
//! failures never flip a batch to `erro`; only systemic failures do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Batch processing state, serialized to the legacy wire strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Submitted, staging not yet started
    #[serde(rename = "pendente")]
    Pending,
    /// Background worker is staging or applying rules
    #[serde(rename = "processando")]
    Processing,
    /// All rows resolved to facts or exclusions
    #[serde(rename = "concluido")]
    Completed,
    /// Systemic failure; safe to resubmit (idempotent upserts)
    #[serde(rename = "erro")]
    Failed,
    /// Cancelled between chunks by operator request
    #[serde(rename = "cancelado")]
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pendente",
            Self::Processing => "processando",
            Self::Completed => "concluido",
            Self::Failed => "erro",
            Self::Cancelled => "cancelado",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendente" => Ok(Self::Pending),
            "processando" => Ok(Self::Processing),
            "concluido" => Ok(Self::Completed),
            "erro" => Ok(Self::Failed),
            "cancelado" => Ok(Self::Cancelled),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

/// Progress counters, persisted after every chunk so a crash loses at
/// most the in-flight chunk
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchProgress {
    pub rows_total: u64,
    pub rows_processed: u64,
    pub rows_inserted: u64,
    pub rows_error: u64,
}

/// One upload batch (in-memory state, persisted by `db::batches`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    /// Original source file name (also keys exclusion records)
    pub source_file: String,
    /// SHA-256 of the uploaded bytes; duplicate-submission detection
    pub content_hash: String,
    /// Already-authenticated caller identity, audit attribution only
    pub submitted_by: String,
    pub status: BatchStatus,
    pub progress: BatchProgress,
    /// Human-readable detail: current operation, anomaly summary, or error
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(source_file: String, content_hash: String, submitted_by: String) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_file,
            content_hash,
            submitted_by,
            status: BatchStatus::Pending,
            progress: BatchProgress::default(),
            detail: String::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to a new state, stamping `completed_at` on terminal states
    pub fn transition_to(&mut self, new_status: BatchStatus) {
        self.status = new_status;
        if new_status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Reset counters for an idempotent reprocess of the same source
    pub fn reset_for_reprocess(&mut self, submitted_by: String) {
        self.status = BatchStatus::Pending;
        self.progress = BatchProgress::default();
        self.detail = String::new();
        self.submitted_by = submitted_by;
        self.started_at = Utc::now();
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_stamp_completed_at() {
        let mut batch = Batch::new("vol.csv".into(), "abc".into(), "ops".into());
        assert!(batch.completed_at.is_none());

        batch.transition_to(BatchStatus::Processing);
        assert!(batch.completed_at.is_none());

        batch.transition_to(BatchStatus::Completed);
        assert!(batch.completed_at.is_some());
    }

    #[test]
    fn status_round_trips_through_wire_strings() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Cancelled,
        ] {
            let parsed: BatchStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
