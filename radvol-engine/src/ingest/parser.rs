//! Row parser
//!
//! Contract: given one raw row and the header alias table, produce exactly
//! one of `NormalizedRow` or `RejectedRow`. Malformed fields become nulls
//! plus a parse note unless the field is mandatory.

use radvol_common::{Error, Result};
use serde_json::json;
use std::collections::HashMap;

use super::fields;
use super::headers::{canonical, HeaderAliases};
use crate::models::{MotiveCode, NormalizedRow, ParsedRow, RejectedRow};

/// One raw spreadsheet row: original header → value pairs in column order
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 0-based ordinal within the source file (header row excluded)
    pub ordinal: u64,
    pub fields: Vec<(String, String)>,
}

impl RawRow {
    /// Original payload preserved verbatim for rejection/exclusion records
    pub fn payload_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Read an uploaded tabular file into raw rows.
///
/// Column order is irrelevant; headers travel with every row so rejected
/// rows keep their original spellings. An unreadable file (no header row,
/// undecodable bytes) is a batch-level failure, not a row rejection.
pub fn read_upload(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(sniff_delimiter(bytes))
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("unreadable upload header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.is_empty() {
        return Err(Error::InvalidInput("upload has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for (ordinal, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| Error::InvalidInput(format!("unreadable upload row: {}", e)))?;
        let fields = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();
        rows.push(RawRow {
            ordinal: ordinal as u64,
            fields,
        });
    }

    Ok(rows)
}

/// Pick the delimiter with the most occurrences in the header line.
/// Client exports alternate between comma, semicolon and tab.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let header_line = bytes.split(|&b| b == b'\n').next().unwrap_or(&[]);
    [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|d| header_line.iter().filter(|&&b| b == *d).count())
        .unwrap_or(b',')
}

/// Resolved field value, `None` when absent or blank
fn non_empty(resolved: &HashMap<&'static str, String>, field: &'static str) -> Option<String> {
    resolved
        .get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parses raw rows into normalized or rejected rows
#[derive(Debug, Clone, Default)]
pub struct RowParser {
    aliases: HeaderAliases,
}

impl RowParser {
    pub fn new(aliases: HeaderAliases) -> Self {
        Self { aliases }
    }

    /// Parse one raw row. Total: never panics on malformed input.
    pub fn parse(&self, raw: &RawRow) -> ParsedRow {
        let resolved = self.resolve_fields(raw);

        // Mandatory fields: client and patient. Missing either rejects the
        // row before staging.
        let client = match non_empty(&resolved, canonical::CLIENT) {
            Some(v) => v,
            None => return self.reject(raw, "client identifier missing"),
        };
        let patient = match non_empty(&resolved, canonical::PATIENT) {
            Some(v) => v,
            None => return self.reject(raw, "patient identifier missing"),
        };

        let mut notes = Vec::new();

        let exam_name = non_empty(&resolved, canonical::EXAM_NAME)
            .map(|name| fields::cleanse_exam_name(&name))
            .unwrap_or_default();

        // Quantity defaults to 1: many uploads carry one exam per row and
        // omit the column entirely.
        let quantity = match resolved.get(canonical::QUANTITY).filter(|v| !v.is_empty()) {
            Some(v) => match fields::parse_quantity(v) {
                Ok(q) => q,
                Err(reason) => {
                    notes.push(format!("quantity: {}", reason));
                    1
                }
            },
            None => 1,
        };

        let value = match resolved.get(canonical::VALUE).filter(|v| !v.is_empty()) {
            Some(v) => match fields::parse_decimal(v) {
                Ok(val) => val,
                Err(reason) => {
                    notes.push(format!("value: {}", reason));
                    0.0
                }
            },
            None => 0.0,
        };

        let realized_date = self.parse_date_field(&resolved, canonical::REALIZED_DATE, &mut notes);
        let realized_time = self.parse_time_field(&resolved, canonical::REALIZED_TIME, &mut notes);
        let reported_date = self.parse_date_field(&resolved, canonical::REPORTED_DATE, &mut notes);
        let reported_time = self.parse_time_field(&resolved, canonical::REPORTED_TIME, &mut notes);

        ParsedRow::Normalized(Box::new(NormalizedRow {
            client,
            patient,
            exam_name,
            modality: non_empty(&resolved, canonical::MODALITY),
            specialty: non_empty(&resolved, canonical::SPECIALTY),
            category: non_empty(&resolved, canonical::CATEGORY),
            priority: non_empty(&resolved, canonical::PRIORITY),
            physician: non_empty(&resolved, canonical::PHYSICIAN),
            quantity,
            value,
            realized_date,
            realized_time,
            reported_date,
            reported_time,
            parse_notes: notes,
        }))
    }

    fn resolve_fields(&self, raw: &RawRow) -> HashMap<&'static str, String> {
        let mut resolved: HashMap<&'static str, String> = HashMap::new();
        for (header, value) in &raw.fields {
            if let Some(field) = self.aliases.resolve(header) {
                // First non-empty value wins when aliases collide
                let slot = resolved.entry(field).or_default();
                if slot.is_empty() {
                    *slot = value.trim().to_string();
                }
            }
        }
        resolved
    }

    fn parse_date_field(
        &self,
        resolved: &HashMap<&'static str, String>,
        field: &'static str,
        notes: &mut Vec<String>,
    ) -> Option<chrono::NaiveDate> {
        let value = resolved.get(field).filter(|v| !v.is_empty())?;
        match fields::parse_date(value) {
            Ok(date) => Some(date),
            Err(reason) => {
                notes.push(format!("{}: {}", field, reason));
                None
            }
        }
    }

    fn parse_time_field(
        &self,
        resolved: &HashMap<&'static str, String>,
        field: &'static str,
        notes: &mut Vec<String>,
    ) -> Option<chrono::NaiveTime> {
        let value = resolved.get(field).filter(|v| !v.is_empty())?;
        match fields::parse_time(value) {
            Ok(time) => Some(time),
            Err(reason) => {
                notes.push(format!("{}: {}", field, reason));
                None
            }
        }
    }

    fn reject(&self, raw: &RawRow, detail: &str) -> ParsedRow {
        ParsedRow::Rejected(Box::new(RejectedRow {
            ordinal: raw.ordinal,
            payload: raw.payload_json(),
            motive: MotiveCode::MissingRequiredField,
            detail: detail.to_string(),
        }))
    }
}
