//! Physician name normalization for roster matching

use crate::ingest::normalize_token;

/// Honorific prefixes dropped before roster comparison
const HONORIFICS: &[&str] = &["dr", "dr.", "dra", "dra.", "doutor", "doutora"];

/// Normalize a physician name: case, diacritics, whitespace and leading
/// honorifics. Roster keys are stored in this form.
pub fn normalize_physician_name(raw: &str) -> String {
    let normalized = normalize_token(raw);
    let mut tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    while let Some(first) = tokens.first() {
        if HONORIFICS.contains(first) {
            tokens.remove(0);
        } else {
            break;
        }
    }

    tokens.join(" ")
}
