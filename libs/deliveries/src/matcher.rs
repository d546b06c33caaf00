//! Tolerant property matching over JSON event payloads. Stored values may be
//! scalars or arrays, strings or integers; a filter matches across those
//! representations. Filters sharing a key are OR'ed, distinct keys AND'ed,
//! and an unsatisfiable filter compiles to `1 = 0` rather than being dropped
//! ("no results" over "wrong results").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::QueryBuilder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub key: String,
    /// String or number; anything else is unsatisfiable.
    pub value: Value,
}

/// JSON path for one property key. Quotes inside keys are stripped; a key is
/// one path segment, never a nested path.
fn key_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', ""))
}

/// Equality targets for one filter value across the scalar/array and
/// string/integer representations.
fn value_targets(value: &Value) -> Vec<crate::query::SqlValue> {
    use crate::query::SqlValue;
    match value {
        Value::String(s) => {
            let mut targets = vec![SqlValue::Text(s.clone())];
            if let Ok(n) = s.parse::<i64>() {
                targets.push(SqlValue::Integer(n));
            }
            targets
        }
        Value::Number(n) => {
            let floored = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.floor() as i64));
            match floored {
                Some(i) => vec![SqlValue::Integer(i), SqlValue::Text(i.to_string())],
                None => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Compiles the filter list into one SQL predicate over `column` (a JSON text
/// column such as `s.properties`).
pub fn compile_property_filters(
    qb: &mut QueryBuilder,
    column: &str,
    filters: &[PropertyFilter],
) -> String {
    // Group by key, preserving first-seen key order.
    let mut keys: Vec<&str> = Vec::new();
    for filter in filters {
        if !keys.contains(&filter.key.as_str()) {
            keys.push(&filter.key);
        }
    }

    let mut per_key = Vec::new();
    for key in keys {
        let mut alternatives = Vec::new();
        for filter in filters.iter().filter(|f| f.key == key) {
            let targets = value_targets(&filter.value);
            if targets.is_empty() {
                continue;
            }
            let path = qb.bind(key_path(key));
            let comparisons: Vec<String> = targets
                .into_iter()
                .map(|target| {
                    let p = qb.bind(target);
                    format!("jv.value = {p}")
                })
                .collect();
            alternatives.push(format!(
                "EXISTS (SELECT 1 FROM json_each({column}, {path}) jv WHERE {})",
                comparisons.join(" OR ")
            ));
        }
        if alternatives.is_empty() {
            per_key.push("1 = 0".to_string());
        } else {
            per_key.push(format!("({})", alternatives.join(" OR ")));
        }
    }

    if per_key.is_empty() {
        "1 = 0".to_string()
    } else {
        format!("({})", per_key.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlValue;
    use serde_json::json;

    #[test]
    fn empty_or_unusable_filters_compile_to_always_false() {
        let mut qb = QueryBuilder::new();
        assert_eq!(compile_property_filters(&mut qb, "p", &[]), "1 = 0");

        let filters = vec![PropertyFilter {
            key: "flag".into(),
            value: json!(true),
        }];
        let sql = compile_property_filters(&mut qb, "p", &filters);
        assert_eq!(sql, "(1 = 0)");
    }

    #[test]
    fn string_filter_also_targets_integer_form() {
        let mut qb = QueryBuilder::new();
        let filters = vec![PropertyFilter {
            key: "count".into(),
            value: json!("42"),
        }];
        compile_property_filters(&mut qb, "p", &filters);
        let params = qb.into_params();
        assert!(params.iter().any(|(_, v)| *v == SqlValue::Text("42".into())));
        assert!(params.iter().any(|(_, v)| *v == SqlValue::Integer(42)));
    }

    #[test]
    fn number_filter_floors_and_targets_string_form() {
        let mut qb = QueryBuilder::new();
        let filters = vec![PropertyFilter {
            key: "score".into(),
            value: json!(3.9),
        }];
        compile_property_filters(&mut qb, "p", &filters);
        let params = qb.into_params();
        assert!(params.iter().any(|(_, v)| *v == SqlValue::Integer(3)));
        assert!(params.iter().any(|(_, v)| *v == SqlValue::Text("3".into())));
    }

    #[test]
    fn same_key_or_distinct_keys_and() {
        let mut qb = QueryBuilder::new();
        let filters = vec![
            PropertyFilter {
                key: "a".into(),
                value: json!("x"),
            },
            PropertyFilter {
                key: "a".into(),
                value: json!("y"),
            },
            PropertyFilter {
                key: "b".into(),
                value: json!("z"),
            },
        ];
        let sql = compile_property_filters(&mut qb, "p", &filters);
        let and_parts: Vec<&str> = sql.split(" AND ").collect();
        assert_eq!(and_parts.len(), 2);
        assert!(and_parts[0].matches("EXISTS").count() == 2);
    }

    #[test]
    fn keys_with_quotes_are_sanitized() {
        assert_eq!(key_path(r#"fo"o"#), r#"$."foo""#);
    }
}
