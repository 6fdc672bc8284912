//! Rule condition evaluation.
//!
//! Conditions are JSON objects whose fields are matched against a
//! per-detection context map. Supported forms per field: direct
//! equality, operator objects (`{"operator": ">", "value": 0.5}`), and
//! `*`/`?` wildcards for strings. An empty or null condition always
//! matches.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

pub fn matches_condition(condition: &Value, context: &HashMap<String, Value>) -> bool {
    if condition.is_null() {
        return true;
    }
    let Some(fields) = condition.as_object() else {
        return false;
    };
    if fields.is_empty() {
        return true;
    }
    for (key, expected) in fields {
        match context.get(key) {
            Some(actual) => {
                if !value_matches(expected, actual) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn value_matches(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }

    if let Some(expected_obj) = expected.as_object() {
        if let (Some(op), Some(threshold)) = (expected_obj.get("operator"), expected_obj.get("value"))
        {
            return apply_operator(op.as_str().unwrap_or("="), actual, threshold);
        }
    }

    if let (Some(pattern), Some(text)) = (expected.as_str(), actual.as_str()) {
        if pattern.contains('*') || pattern.contains('?') {
            return wildcard_match(pattern, text);
        }
    }

    false
}

fn apply_operator(op: &str, actual: &Value, threshold: &Value) -> bool {
    match (actual.as_f64(), threshold.as_f64()) {
        (Some(a), Some(t)) => match op {
            ">" => a > t,
            ">=" => a >= t,
            "<" => a < t,
            "<=" => a <= t,
            "=" | "==" => (a - t).abs() < f64::EPSILON,
            "!=" => (a - t).abs() >= f64::EPSILON,
            _ => false,
        },
        _ => false,
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    match regex::Regex::new(&format!("^{}$", escaped)) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "failed to compile wildcard pattern");
            false
        }
    }
}
