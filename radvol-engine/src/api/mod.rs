//! HTTP API handlers
//!
//! Polling surface over the batch pipeline: submit, poll, cancel,
//! export. No push notifications; clients poll the batch status record.

pub mod batches;
pub mod health;
pub mod pricing;
pub mod reconciliation;

pub use batches::batch_routes;
pub use health::health_routes;
pub use pricing::pricing_routes;
pub use reconciliation::reconciliation_routes;
