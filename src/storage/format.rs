//! Typing of scraped values before storage
//!
//! Pages deliver everything as text. Values that clearly are dates, amounts or
//! counts are converted so they can be queried as such; anything else is kept
//! as a string.

use chrono::NaiveDate;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Converts one scraped value
///
/// | Input | Output |
/// |-------|--------|
/// | empty | `null` |
/// | `MM/DD/YYYY` | ISO date string |
/// | `$1,234.56`, `-$5.00` | number |
/// | `1234` | integer |
/// | `12.5` | float |
/// | anything else | trimmed string |
pub fn format_value(raw: &str) -> Value {
    let value = raw.trim();
    if value.is_empty() {
        return Value::Null;
    }

    if let Some(date) = parse_date(value) {
        return Value::String(date.format("%Y-%m-%d").to_string());
    }

    if let Some(amount) = parse_money(value) {
        if let Some(number) = Number::from_f64(amount) {
            return Value::Number(number);
        }
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(integer) = value.parse::<i64>() {
            return Value::Number(integer.into());
        }
    }

    if is_plain_decimal(value) {
        if let Some(number) = value.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }

    Value::String(value.to_string())
}

/// Formats every value of a flat field map
pub fn format_fields(fields: &BTreeMap<String, String>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), format_value(value)))
        .collect()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[2] != b'/' || bytes[5] != b'/' {
        return None;
    }
    NaiveDate::parse_from_str(value, "%m/%d/%Y").ok()
}

fn parse_money(value: &str) -> Option<f64> {
    let (negative, rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let digits = rest.strip_prefix('$')?;

    let (whole, cents) = digits.split_once('.')?;
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit() || b == b',')
        || cents.len() != 2
        || !cents.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let amount: f64 = format!("{}.{}", whole.replace(',', ""), cents).parse().ok()?;
    Some(if negative { -amount } else { amount })
}

fn is_plain_decimal(value: &str) -> bool {
    match value.split_once('.') {
        Some((whole, fraction)) => {
            !whole.is_empty()
                && !fraction.is_empty()
                && whole.bytes().all(|b| b.is_ascii_digit())
                && fraction.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
