//! Database operations, one module per entity
//!
//! All access goes through these typed repositories; there is no runtime
//! dispatch by table name anywhere in the engine.

pub mod batches;
pub mod exclusions;
pub mod facts;
pub mod reference;
pub mod staging;
