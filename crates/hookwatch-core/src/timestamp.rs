use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Numbers above this are epoch milliseconds, at or below it epoch seconds.
pub const MILLIS_BOUNDARY: f64 = 9_999_999_999.0;

const MAX_EPOCH_MILLIS: f64 = 8.64e15;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

pub fn normalize(raw: Option<&Value>) -> DateTime<Utc> {
    normalize_at(raw, Utc::now())
}

pub fn normalize_at(raw: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    parse_instant(raw)
        .filter(is_plausible)
        .unwrap_or(now)
}

pub fn parse_instant(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    match raw? {
        Value::Number(number) => from_epoch(number.as_f64()?),
        Value::String(text) => parse_text(text),
        _ => None,
    }
}

/// Anything at or before 1970 is treated as a unit mix-up, not a real instant.
pub fn is_plausible(instant: &DateTime<Utc>) -> bool {
    instant.year() > 1970
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() > MILLIS_BOUNDARY {
        value
    } else {
        value * 1000.0
    };
    if millis.abs() > MAX_EPOCH_MILLIS {
        return None;
    }
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn seconds_scale_number_is_scaled() {
        let value = json!(1_700_000_000);
        let instant = normalize_at(Some(&value), now());
        assert_eq!(instant.year(), 2023);
        assert_eq!(instant.timestamp(), 1_700_000_000);
    }

    #[test]
    fn millisecond_scale_number_is_used_as_is() {
        let value = json!(1_700_000_000_123_i64);
        let instant = normalize_at(Some(&value), now());
        assert_eq!(instant.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn fractional_seconds_keep_millis() {
        let value = json!(1_700_000_000.25);
        let instant = normalize_at(Some(&value), now());
        assert_eq!(instant.timestamp_millis(), 1_700_000_000_250);
    }

    #[test]
    fn boundary_value_is_seconds() {
        let value = json!(9_999_999_999_i64);
        let instant = normalize_at(Some(&value), now());
        assert_eq!(instant.timestamp(), 9_999_999_999);
    }

    #[test]
    fn just_above_boundary_is_millis_and_lands_in_1970() {
        let value = json!(10_000_000_000_i64);
        assert_eq!(
            parse_instant(Some(&value)).map(|instant| instant.year()),
            Some(1970)
        );
        assert_eq!(normalize_at(Some(&value), now()), now());
    }

    #[test]
    fn epoch_zero_and_negative_fall_back() {
        for value in [json!(0), json!(-5), json!(86_400)] {
            assert_eq!(normalize_at(Some(&value), now()), now(), "value {value}");
        }
    }

    #[test]
    fn strings_parse_through_common_formats() {
        for text in [
            "2024-06-01T12:00:00Z",
            "2024-06-01T12:00:00.123+02:00",
            "2024-06-01T12:00:00.5",
            "2024-06-01 12:00:00",
            "Sat, 01 Jun 2024 12:00:00 +0000",
            "2024-06-01",
        ] {
            let value = json!(text);
            let instant = normalize_at(Some(&value), now());
            assert_eq!(instant.year(), 2024, "text {text}");
        }
    }

    #[test]
    fn garbage_and_absent_fall_back_to_now() {
        for value in [json!("not a date"), json!(""), json!(true), json!({"a": 1})] {
            assert_eq!(normalize_at(Some(&value), now()), now());
        }
        assert_eq!(normalize_at(None, now()), now());
        assert_eq!(normalize_at(Some(&json!("1970-06-01T00:00:00Z")), now()), now());
    }

    #[test]
    fn huge_numbers_do_not_overflow() {
        let value = json!(1e300);
        assert_eq!(normalize_at(Some(&value), now()), now());
    }
}
