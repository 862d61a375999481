//! Row identifiers and typed cell values.
//!
//! Rows enter the engine as `serde_json::Value` objects supplied by the host.
//! Columns read them into [`CellValue`]s according to their semantic type, so
//! every engine stage (filter, sort, group, aggregate) works on the same
//! normalized representation.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::column::ColumnType;

/// Id of the synthetic root node every row tree hangs from.
pub const ROOT_ROW_ID: &str = "auto-generated-group-node-root";

/// A stable row identifier: either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    /// Numeric id.
    Int(i64),
    /// String id.
    Str(String),
}

impl RowId {
    /// The id of the synthetic root node.
    pub fn root() -> Self {
        Self::Str(ROOT_ROW_ID.to_string())
    }

    /// Returns `true` for the synthetic root id.
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Str(s) if s == ROOT_ROW_ID)
    }

    /// Read an id out of a JSON value (numbers and strings only).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(|f| Self::Str(f.to_string()))),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RowId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// A normalized cell value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// Missing or empty value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value. `NaN` is treated like `Null` by comparisons.
    Number(f64),
    /// Text value.
    String(String),
    /// Point in time.
    Date(DateTime<Utc>),
    /// Multiple values (multi-select columns).
    List(Vec<CellValue>),
}

impl CellValue {
    /// Returns `true` for `Null`, `NaN` and empty strings.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Number(n) => n.is_nan(),
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Returns `true` only for `Null` and `NaN`.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) if !n.is_nan() => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Date(d) => Some(d.timestamp_millis() as f64),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Date view of the value.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Convert a raw JSON value without type information.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => Self::String(value.to_string()),
        }
    }

    /// Convert a raw JSON value according to a column type.
    ///
    /// Values that cannot be coerced become `Null`.
    pub fn coerce(value: &Value, column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Number => match value {
                Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
                Value::String(s) => s.trim().parse::<f64>().map_or(Self::Null, Self::Number),
                _ => Self::Null,
            },
            ColumnType::Boolean => match value {
                Value::Bool(b) => Self::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Self::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Self::Bool(false),
                _ => Self::Null,
            },
            ColumnType::Date | ColumnType::DateTime => parse_date(value).map_or(Self::Null, Self::Date),
            ColumnType::String | ColumnType::SingleSelect => match value {
                Value::Null => Self::Null,
                Value::String(s) => Self::String(s.clone()),
                other => Self::from_json(other),
            },
            ColumnType::MultiSelect => match value {
                Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
                Value::Null => Self::Null,
                other => Self::List(vec![Self::from_json(other)]),
            },
            ColumnType::Custom => Self::from_json(value),
        }
    }

    /// Convert back into JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::String(s) => Value::String(s.clone()),
            Self::Date(d) => Value::String(d.to_rfc3339()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Plain text rendering used by quick filtering and group keys.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Date(d) => d.to_rfc3339(),
            Self::List(items) => items
                .iter()
                .map(Self::to_display_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Parse a date from RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS]` or epoch milliseconds.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Case-insensitive text ordering.
///
/// Compares lowercased strings code point by code point. The order is not
/// locale-aware: accented letters sort by code point, not by any language's
/// collation rules.
pub fn compare_text(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_id_from_json() {
        assert_eq!(RowId::from_json(&json!(7)), Some(RowId::Int(7)));
        assert_eq!(RowId::from_json(&json!("a")), Some(RowId::from("a")));
        assert_eq!(RowId::from_json(&json!(null)), None);
        assert!(RowId::root().is_root());
        assert!(!RowId::from(1).is_root());
    }

    #[test]
    fn test_row_id_serde_untagged() {
        let ids: Vec<RowId> = serde_json::from_value(json!([1, "two"])).unwrap();
        assert_eq!(ids, vec![RowId::Int(1), RowId::from("two")]);
        assert_eq!(serde_json::to_value(&ids).unwrap(), json!([1, "two"]));
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(CellValue::coerce(&json!(3), ColumnType::Number), CellValue::Number(3.0));
        assert_eq!(CellValue::coerce(&json!(" 2.5 "), ColumnType::Number), CellValue::Number(2.5));
        assert_eq!(CellValue::coerce(&json!("abc"), ColumnType::Number), CellValue::Null);
    }

    #[test]
    fn test_coerce_dates() {
        let a = CellValue::coerce(&json!("2024-01-02"), ColumnType::Date);
        let b = CellValue::coerce(&json!("2024-01-02T00:00:00Z"), ColumnType::DateTime);
        let c = CellValue::coerce(&json!(1_704_153_600_000_i64), ColumnType::Date);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(CellValue::coerce(&json!("nope"), ColumnType::Date), CellValue::Null);
    }

    #[test]
    fn test_display_string() {
        assert_eq!(CellValue::Number(3.0).to_display_string(), "3");
        assert_eq!(CellValue::Number(2.5).to_display_string(), "2.5");
        assert_eq!(CellValue::Null.to_display_string(), "");
    }

    #[test]
    fn test_compare_text_case_insensitive() {
        assert_eq!(compare_text("apple", "Banana"), Ordering::Less);
        assert_eq!(compare_text("ABC", "abc"), Ordering::Equal);
    }
}
