//! Domain model types

mod batch;
mod exclusion;
mod fact;
mod reference;
mod row;

pub use batch::{Batch, BatchProgress, BatchStatus};
pub use exclusion::{ExclusionRecord, ExclusionSummary, MotiveCode};
pub use fact::VolumetriaFact;
pub use reference::{
    BillingWindow, DeParaMapping, ExamBreakRule, ExamRegistryEntry, PriceTier, ReferenceData,
};
pub use row::{NormalizedRow, ParsedRow, RejectedRow};
