//! # radvol Common Library
//!
//! Shared code for the radvol volumetria services:
//! - Error taxonomy
//! - Configuration loading
//! - Database initialization and schema

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
