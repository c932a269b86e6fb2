//! Ingestion parser
//!
//! Turns loosely-structured tabular uploads into typed rows. Headers are
//! resolved through an alias table (never positional); field parsers are
//! total functions that null the field and record a reason instead of
//! failing the row.

pub mod fields;
pub mod headers;
pub mod parser;

pub use headers::{fold_diacritics, normalize_token, HeaderAliases};
pub use parser::{read_upload, RowParser};
