//! Default filter operators per column type.

use std::collections::HashSet;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde_json::Value;

use super::{FilterOperator, cell_predicate};
use crate::column::ColumnType;
use crate::value::{CellValue, parse_date};

/// The built-in operators for a column type.
pub fn default_operators(column_type: ColumnType) -> Vec<FilterOperator> {
    match column_type {
        ColumnType::String | ColumnType::Custom => string_operators(),
        ColumnType::Number => number_operators(),
        ColumnType::Date => date_operators(false),
        ColumnType::DateTime => date_operators(true),
        ColumnType::Boolean => vec![boolean_is()],
        ColumnType::SingleSelect => single_select_operators(),
        ColumnType::MultiSelect => multi_select_operators(),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn texts_of(value: &Value) -> Option<HashSet<String>> {
    let set: HashSet<String> = value.as_array()?.iter().filter_map(text_of).collect();
    (!set.is_empty()).then_some(set)
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cell_text(cell: &CellValue) -> String {
    cell.to_display_string().to_lowercase()
}

fn is_empty_operator() -> FilterOperator {
    FilterOperator::without_value("isEmpty", |_| {
        Some(cell_predicate(|cell, _| cell.is_empty()))
    })
}

fn is_not_empty_operator() -> FilterOperator {
    FilterOperator::without_value("isNotEmpty", |_| {
        Some(cell_predicate(|cell, _| !cell.is_empty()))
    })
}

fn string_operator(name: &'static str, test: fn(&str, &str) -> bool) -> FilterOperator {
    FilterOperator::new(name, move |value| {
        let needle = text_of(value)?;
        Some(cell_predicate(move |cell, _| test(&cell_text(cell), &needle)))
    })
}

fn string_operators() -> Vec<FilterOperator> {
    vec![
        string_operator("contains", |cell, needle| cell.contains(needle)),
        string_operator("doesNotContain", |cell, needle| !cell.contains(needle)),
        string_operator("equals", |cell, needle| cell == needle),
        string_operator("doesNotEqual", |cell, needle| cell != needle),
        string_operator("startsWith", |cell, needle| cell.starts_with(needle)),
        string_operator("endsWith", |cell, needle| cell.ends_with(needle)),
        is_empty_operator(),
        is_not_empty_operator(),
        FilterOperator::new("isAnyOf", |value| {
            let options = texts_of(value)?;
            Some(cell_predicate(move |cell, _| options.contains(&cell_text(cell))))
        }),
    ]
}

fn number_operator(name: &'static str, test: fn(f64, f64) -> bool) -> FilterOperator {
    FilterOperator::new(name, move |value| {
        let target = number_of(value)?;
        Some(cell_predicate(move |cell, _| cell.as_f64().is_some_and(|n| test(n, target))))
    })
}

fn number_operators() -> Vec<FilterOperator> {
    vec![
        number_operator("=", |a, b| a == b),
        FilterOperator::new("!=", |value| {
            let target = number_of(value)?;
            Some(cell_predicate(move |cell, _| cell.as_f64() != Some(target)))
        }),
        number_operator(">", |a, b| a > b),
        number_operator(">=", |a, b| a >= b),
        number_operator("<", |a, b| a < b),
        number_operator("<=", |a, b| a <= b),
        is_empty_operator(),
        is_not_empty_operator(),
        FilterOperator::new("isAnyOf", |value| {
            let options: Vec<f64> = value.as_array()?.iter().filter_map(number_of).collect();
            if options.is_empty() {
                return None;
            }
            Some(cell_predicate(move |cell, _| {
                cell.as_f64().is_some_and(|n| options.contains(&n))
            }))
        }),
    ]
}

/// Date filters compare at day granularity, date-time filters at minute granularity.
fn truncate(date: DateTime<Utc>, keep_time: bool) -> DateTime<Utc> {
    let unit = if keep_time {
        TimeDelta::minutes(1)
    } else {
        TimeDelta::days(1)
    };
    date.duration_trunc(unit).unwrap_or(date)
}

fn date_operator(
    name: &'static str,
    keep_time: bool,
    test: fn(i64, i64) -> bool,
) -> FilterOperator {
    FilterOperator::new(name, move |value| {
        let target = truncate(parse_date(value)?, keep_time).timestamp_millis();
        Some(cell_predicate(move |cell, _| {
            cell.as_date()
                .is_some_and(|d| test(truncate(d, keep_time).timestamp_millis(), target))
        }))
    })
}

fn date_operators(keep_time: bool) -> Vec<FilterOperator> {
    vec![
        date_operator("is", keep_time, |a, b| a == b),
        FilterOperator::new("not", move |value| {
            let target = truncate(parse_date(value)?, keep_time).timestamp_millis();
            Some(cell_predicate(move |cell, _| {
                cell.as_date()
                    .is_none_or(|d| truncate(d, keep_time).timestamp_millis() != target)
            }))
        }),
        date_operator("after", keep_time, |a, b| a > b),
        date_operator("onOrAfter", keep_time, |a, b| a >= b),
        date_operator("before", keep_time, |a, b| a < b),
        date_operator("onOrBefore", keep_time, |a, b| a <= b),
        is_empty_operator(),
        is_not_empty_operator(),
    ]
}

fn boolean_is() -> FilterOperator {
    FilterOperator::new("is", |value| {
        let target = match value {
            Value::Bool(b) => *b,
            Value::String(s) if s.eq_ignore_ascii_case("true") => true,
            Value::String(s) if s.eq_ignore_ascii_case("false") => false,
            _ => return None,
        };
        Some(cell_predicate(move |cell, _| cell.as_bool().unwrap_or(false) == target))
    })
}

fn single_select_operators() -> Vec<FilterOperator> {
    vec![
        FilterOperator::new("is", |value| {
            let target = text_of(value)?;
            Some(cell_predicate(move |cell, _| cell_text(cell) == target))
        }),
        FilterOperator::new("not", |value| {
            let target = text_of(value)?;
            Some(cell_predicate(move |cell, _| cell_text(cell) != target))
        }),
        FilterOperator::new("isAnyOf", |value| {
            let options = texts_of(value)?;
            Some(cell_predicate(move |cell, _| options.contains(&cell_text(cell))))
        }),
    ]
}

fn list_texts(cell: &CellValue) -> Vec<String> {
    match cell {
        CellValue::List(items) => items.iter().map(cell_text).collect(),
        CellValue::Null => Vec::new(),
        other => vec![cell_text(other)],
    }
}

fn multi_select_operators() -> Vec<FilterOperator> {
    vec![
        FilterOperator::new("contains", |value| {
            let target = text_of(value)?;
            Some(cell_predicate(move |cell, _| list_texts(cell).contains(&target)))
        }),
        FilterOperator::new("isAnyOf", |value| {
            let options = texts_of(value)?;
            Some(cell_predicate(move |cell, _| {
                list_texts(cell).iter().any(|t| options.contains(t))
            }))
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(column_type: ColumnType, op: &str, filter: Value, cell: CellValue) -> Option<bool> {
        let operators = default_operators(column_type);
        let operator = operators.iter().find(|o| o.value == op)?;
        let predicate = operator.predicate(Some(&filter))?;
        Some(predicate(&cell, &Value::Null))
    }

    #[test]
    fn test_string_operators_are_case_insensitive() {
        let cell = CellValue::String("Hello World".into());
        assert_eq!(check(ColumnType::String, "contains", json!("WORLD"), cell.clone()), Some(true));
        assert_eq!(check(ColumnType::String, "startsWith", json!("hello"), cell.clone()), Some(true));
        assert_eq!(check(ColumnType::String, "equals", json!("hello"), cell.clone()), Some(false));
        assert_eq!(
            check(ColumnType::String, "isAnyOf", json!(["x", "hello world"]), cell),
            Some(true)
        );
    }

    #[test]
    fn test_missing_value_is_inactive() {
        assert_eq!(check(ColumnType::String, "contains", json!(""), CellValue::Null), None);
        assert_eq!(check(ColumnType::Number, ">", json!("abc"), CellValue::Null), None);
        assert_eq!(check(ColumnType::Number, "isAnyOf", json!([]), CellValue::Null), None);
    }

    #[test]
    fn test_number_operators() {
        let cell = CellValue::Number(30.0);
        assert_eq!(check(ColumnType::Number, ">", json!(26), cell.clone()), Some(true));
        assert_eq!(check(ColumnType::Number, "<=", json!("30"), cell.clone()), Some(true));
        assert_eq!(check(ColumnType::Number, "!=", json!(30), cell), Some(false));
        assert_eq!(check(ColumnType::Number, "!=", json!(30), CellValue::Null), Some(true));
        assert_eq!(check(ColumnType::Number, ">", json!(1), CellValue::Null), Some(false));
    }

    #[test]
    fn test_date_operators_day_granularity() {
        let cell = CellValue::coerce(&json!("2024-03-05T15:30:00Z"), ColumnType::DateTime);
        assert_eq!(check(ColumnType::Date, "is", json!("2024-03-05"), cell.clone()), Some(true));
        assert_eq!(check(ColumnType::Date, "after", json!("2024-03-04"), cell.clone()), Some(true));
        assert_eq!(
            check(ColumnType::DateTime, "is", json!("2024-03-05"), cell),
            Some(false)
        );
    }

    #[test]
    fn test_boolean_and_selects() {
        assert_eq!(check(ColumnType::Boolean, "is", json!("true"), CellValue::Bool(true)), Some(true));
        assert_eq!(check(ColumnType::Boolean, "is", json!(false), CellValue::Null), Some(true));
        assert_eq!(
            check(ColumnType::SingleSelect, "not", json!("a"), CellValue::String("b".into())),
            Some(true)
        );
        let tags = CellValue::List(vec![CellValue::String("red".into()), CellValue::String("blue".into())]);
        assert_eq!(check(ColumnType::MultiSelect, "contains", json!("blue"), tags.clone()), Some(true));
        assert_eq!(check(ColumnType::MultiSelect, "isAnyOf", json!(["green"]), tags), Some(false));
    }

    #[test]
    fn test_empty_operators_ignore_value() {
        assert_eq!(check(ColumnType::String, "isEmpty", Value::Null, CellValue::Null), Some(true));
        assert_eq!(
            check(ColumnType::Number, "isNotEmpty", Value::Null, CellValue::Number(1.0)),
            Some(true)
        );
    }
}
