use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Grouping key used by choice filters and value counts. Dates collapse
    /// to their year-month bucket.
    pub fn facet_key(&self) -> String {
        match self {
            Value::Date(d) => year_month(d),
            other => other.as_display(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

pub fn year_month(date: &NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Spreadsheet exports mark missing cells with a handful of conventional
/// tokens; these count as empty during type inference.
pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    let stripped = lowered.trim_start_matches('#');
    matches!(
        stripped,
        "na" | "n/a" | "n.a." | "null" | "none" | "nan" | "missing" | "s/i" | "-"
    ) || (!stripped.is_empty() && stripped.chars().all(|c| c == '-'))
}

/// Parses plain numbers as well as the separator conventions spreadsheets
/// produce: `1,234.5`, `1.234,5`, `12,5` and a trailing `%`.
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let body = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    if let Ok(parsed) = body.parse::<f64>() {
        return parsed.is_finite().then_some(parsed);
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
    {
        return None;
    }
    let last_dot = body.rfind('.');
    let last_comma = body.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => body.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => body.replace(',', ""),
        (None, Some(_)) if body.matches(',').count() == 1 => body.replace(',', "."),
        (None, Some(_)) => body.replace(',', ""),
        (Some(_), None) if body.matches('.').count() > 1 => body.replace('.', ""),
        _ => return None,
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in formats {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed.date());
        }
    }
    None
}

pub fn is_uuid(value: &str) -> bool {
    let trimmed = value.trim().trim_matches(|c| matches!(c, '{' | '}'));
    uuid::Uuid::parse_str(trimmed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> Vec<String> {
        vec!["%Y-%m-%d".to_string(), "%d/%m/%Y".to_string(), "%d/%m/%Y %H:%M:%S".to_string()]
    }

    #[test]
    fn parse_number_handles_separator_conventions() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_number("87%"), Some(87.0));
        assert_eq!(parse_number("N/A"), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn parse_date_tries_each_format() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_date("2024-05-06", &formats()), Some(expected));
        assert_eq!(parse_date("06/05/2024", &formats()), Some(expected));
        assert_eq!(parse_date("06/05/2024 10:15:00", &formats()), Some(expected));
        assert_eq!(parse_date("May 6th", &formats()), None);
    }

    #[test]
    fn placeholders_are_recognized() {
        for token in ["NA", "n/a", "#N/A", "null", "-", "---", "S/I"] {
            assert!(is_placeholder(token), "{token} should be a placeholder");
        }
        assert!(!is_placeholder("Nasa"));
        assert!(!is_placeholder(""));
    }

    #[test]
    fn dates_facet_by_year_month() {
        let value = Value::Date(NaiveDate::from_ymd_opt(2023, 11, 30).unwrap());
        assert_eq!(value.facet_key(), "2023-11");
    }

    #[test]
    fn whole_numbers_render_without_decimals() {
        assert_eq!(Value::Number(10.0).as_display(), "10");
        assert_eq!(Value::Number(2.25).as_display(), "2.25");
    }

    #[test]
    fn uuid_detection_accepts_braces() {
        assert!(is_uuid("{550e8400-e29b-41d4-a716-446655440000}"));
        assert!(!is_uuid("550e8400"));
    }
}
