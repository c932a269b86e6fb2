//! Field-level parsers
//!
//! All parsers are total: malformed input yields `Err` with a reason the
//! caller records as a parse note, never a panic.

use chrono::{NaiveDate, NaiveTime};

/// Trailing site-specific exam suffix codes, stripped verbatim.
///
/// Undocumented historical convention carried over from existing uploads;
/// the token set is intentionally fixed and must not be generalized.
const EXAM_SUFFIX_TOKENS: &[&str] = &["DX", "CR", "DR", "SC"];

/// Parse an upload date.
///
/// Accepts `dd/mm/yy`, `dd/mm/yyyy`, `dd-mm-yy`, `dd-mm-yyyy`,
/// `yyyy-mm-dd` and `yyyy/mm/dd`. Calendar-invalid dates fail.
pub fn parse_date(input: &str) -> Result<NaiveDate, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty date".to_string());
    }

    let sep = if trimmed.contains('/') {
        '/'
    } else if trimmed.contains('-') {
        '-'
    } else {
        return Err(format!("unrecognized date format: {}", trimmed));
    };

    let parts: Vec<&str> = trimmed.split(sep).collect();
    if parts.len() != 3 {
        return Err(format!("unrecognized date format: {}", trimmed));
    }

    let (year, month, day) = if parts[0].len() == 4 {
        // yyyy-mm-dd / yyyy/mm/dd
        (
            parse_component(parts[0], "year")?,
            parse_component(parts[1], "month")?,
            parse_component(parts[2], "day")?,
        )
    } else {
        // dd-mm-yy[yy] / dd/mm/yy[yy]; only 2- and 4-digit years are valid
        let raw_year = parse_component(parts[2], "year")?;
        let year = match parts[2].trim().len() {
            2 => expand_two_digit_year(raw_year),
            4 => raw_year,
            _ => return Err(format!("invalid year component: {}", parts[2])),
        };
        (
            year,
            parse_component(parts[1], "month")?,
            parse_component(parts[0], "day")?,
        )
    };

    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .ok_or_else(|| format!("invalid calendar date: {}", trimmed))
}

/// Two-digit-year century bands, preserved from historical data:
/// 00–05 → 2000–2005, 06–30 → 2006–2030, 31–99 → 1931–1999.
///
/// The bands are asymmetric; they are kept literal for compatibility with
/// facts already committed under this rule.
fn expand_two_digit_year(yy: i32) -> i32 {
    match yy {
        0..=5 => 2000 + yy,
        6..=30 => 2000 + yy,
        _ => 1900 + yy,
    }
}

fn parse_component(raw: &str, what: &str) -> Result<i32, String> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| format!("invalid {} component: {}", what, raw))
}

/// Parse `hh:mm` or `hh:mm:ss`, range-validated
pub fn parse_time(input: &str) -> Result<NaiveTime, String> {
    let trimmed = input.trim();
    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(format!("unrecognized time format: {}", trimmed));
    }

    let hour = parse_component(parts[0], "hour")?;
    let minute = parse_component(parts[1], "minute")?;
    let second = if parts.len() == 3 {
        parse_component(parts[2], "second")?
    } else {
        0
    };

    if !(0..=23).contains(&hour) || !(0..=59).contains(&minute) || !(0..=59).contains(&second) {
        return Err(format!("time out of range: {}", trimmed));
    }

    NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
        .ok_or_else(|| format!("invalid time: {}", trimmed))
}

/// Parse a monetary/decimal value out of decorated input.
///
/// Strips non-numeric decoration, then disambiguates comma-as-decimal vs
/// thousands separator by the relative positions of the last comma and the
/// last period.
pub fn parse_decimal(input: &str) -> Result<f64, String> {
    let stripped: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();

    if stripped.chars().all(|c| !c.is_ascii_digit()) {
        return Err(format!("no digits in numeric field: {}", input.trim()));
    }

    let last_comma = stripped.rfind(',');
    let last_period = stripped.rfind('.');

    let normalized = match (last_comma, last_period) {
        (Some(comma), Some(period)) if comma > period => {
            // 1.234,56 — periods are thousands separators
            stripped.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => {
            // 1,234.56 — commas are thousands separators
            stripped.replace(',', "")
        }
        (Some(_), None) => stripped.replace(',', "."),
        _ => stripped,
    };

    normalized
        .parse::<f64>()
        .map_err(|_| format!("invalid numeric field: {}", input.trim()))
}

/// Parse a quantity, truncating to integer
pub fn parse_quantity(input: &str) -> Result<i64, String> {
    parse_decimal(input).map(|v| v.trunc() as i64)
}

/// Strip the fixed trailing suffix-code tokens from an exam name
pub fn cleanse_exam_name(input: &str) -> String {
    let mut tokens: Vec<&str> = input.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        let folded = super::headers::fold_diacritics(last).to_uppercase();
        if tokens.len() > 1 && EXAM_SUFFIX_TOKENS.contains(&folded.as_str()) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}
