//! Scalar coercion for provider values
//!
//! Every coercer is total: values that cannot be interpreted become `None`
//! rather than an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Trimmed, non-empty text. Numbers and booleans are rendered as text.
pub fn text(value: Option<&Value>) -> Option<String> {
    let rendered = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };

    (!rendered.is_empty()).then_some(rendered)
}

/// ASCII digits only, e.g. "+55 (11) 99999-0000" → "5511999990000"
pub fn digits(value: Option<&Value>) -> Option<String> {
    let digits: String = text(value)?.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Phone numbers arrive as a scalar or a list; the first entry with digits wins
pub fn phone(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Array(entries) => entries.iter().find_map(|entry| digits(Some(entry))),
        other => digits(Some(other)),
    }
}

pub fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    parsed.is_finite().then_some(parsed)
}

/// Largest magnitude a `NUMERIC(14, 4)` column stores
pub const DECIMAL_LIMIT: f64 = 9_999_999_999.9999;

/// A number that fits the stored decimal columns; anything larger is `None`
pub fn decimal(value: Option<&Value>) -> Option<f64> {
    number(value).filter(|n| n.abs() <= DECIMAL_LIMIT)
}

/// Whole numbers only; "3.0" is accepted, "3.5" is not
pub fn integer(value: Option<&Value>) -> Option<i64> {
    let n = number(value)?;
    (n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64).then_some(n as i64)
}

pub fn int32(value: Option<&Value>) -> Option<i32> {
    integer(value).and_then(|n| i32::try_from(n).ok())
}

/// "Y"/"N" flags, plus real booleans
pub fn yes_no(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "Y" => Some(true),
            "N" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// RFC 3339, or a naive "YYYY-MM-DD HH:MM:SS" / "YYYY-MM-DDTHH:MM:SS" read as
/// UTC, or a bare date at UTC midnight
pub fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = text(value)?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Calendar date from a date or datetime string
pub fn date(value: Option<&Value>) -> Option<NaiveDate> {
    let raw = text(value)?;
    let prefix = raw.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_text() {
        assert_eq!(text(Some(&json!("  Coffee "))), Some("Coffee".into()));
        assert_eq!(text(Some(&json!("   "))), None);
        assert_eq!(text(Some(&json!(1234))), Some("1234".into()));
        assert_eq!(text(Some(&json!({"a": 1}))), None);
        assert_eq!(text(None), None);
    }

    #[test]
    fn test_digits() {
        assert_eq!(digits(Some(&json!("+55 11 99999-0000"))), Some("5511999990000".into()));
        assert_eq!(digits(Some(&json!("123.456.789-09"))), Some("12345678909".into()));
        assert_eq!(digits(Some(&json!("n/a"))), None);
    }

    #[test]
    fn test_phone_accepts_lists() {
        assert_eq!(phone(Some(&json!(["", "(11) 4000-1000"]))), Some("1140001000".into()));
        assert_eq!(phone(Some(&json!([]))), None);
        assert_eq!(phone(Some(&json!("11 5555 0000"))), Some("1155550000".into()));
    }

    #[test]
    fn test_number() {
        assert_eq!(number(Some(&json!(5))), Some(5.0));
        assert_eq!(number(Some(&json!("12.50"))), Some(12.5));
        assert_eq!(number(Some(&json!(""))), None);
        assert_eq!(number(Some(&json!("abc"))), None);
        assert_eq!(number(Some(&json!("inf"))), None);
        assert_eq!(number(Some(&json!(true))), None);
    }

    #[test]
    fn test_decimal_rejects_values_the_columns_cannot_hold() {
        assert_eq!(decimal(Some(&json!("19.90"))), Some(19.9));
        assert_eq!(decimal(Some(&json!(-250))), Some(-250.0));
        assert_eq!(decimal(Some(&json!(9_999_999_999.0))), Some(9_999_999_999.0));
        assert_eq!(decimal(Some(&json!(1e10))), None);
        assert_eq!(decimal(Some(&json!(1e12))), None);
        assert_eq!(decimal(Some(&json!("-1e11"))), None);
        assert_eq!(number(Some(&json!(1e12))), Some(1e12));
    }

    #[test]
    fn test_integer() {
        assert_eq!(integer(Some(&json!("3"))), Some(3));
        assert_eq!(integer(Some(&json!(3.0))), Some(3));
        assert_eq!(integer(Some(&json!(3.5))), None);
        assert_eq!(int32(Some(&json!(1e12))), None);
    }

    #[test]
    fn test_yes_no() {
        assert_eq!(yes_no(Some(&json!("Y"))), Some(true));
        assert_eq!(yes_no(Some(&json!(" n "))), Some(false));
        assert_eq!(yes_no(Some(&json!(true))), Some(true));
        assert_eq!(yes_no(Some(&json!("maybe"))), None);
    }

    #[test]
    fn test_timestamps() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 14, 18, 30, 0).unwrap();
        assert_eq!(timestamp(Some(&json!("2025-03-14 18:30:00"))), Some(expected));
        assert_eq!(timestamp(Some(&json!("2025-03-14T18:30:00Z"))), Some(expected));
        assert_eq!(timestamp(Some(&json!("2025-03-14T15:30:00-03:00"))), Some(expected));
        assert_eq!(
            timestamp(Some(&json!("2025-03-14"))),
            Some(Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap())
        );
        assert_eq!(timestamp(Some(&json!("yesterday"))), None);
    }

    #[test]
    fn test_date() {
        assert_eq!(
            date(Some(&json!("2025-03-14 00:00:00"))),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(date(Some(&json!("14/03/2025"))), None);
    }
}
