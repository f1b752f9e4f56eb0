//! Branch evaluation for condition nodes.

use crate::registry::Operator;
use serde_json::Value;
use std::cmp::Ordering;

/// Compare a payload field against the configured value.
///
/// The field's own JSON type decides the coercion of `check_value`. A
/// missing field never matches, whatever the operator.
pub fn evaluate(operator: Operator, field: Option<&Value>, check_value: &str) -> bool {
    let Some(field) = field else {
        return false;
    };
    let check_value = check_value.trim();

    match field {
        Value::Null => false,
        Value::Number(n) => match (n.as_f64(), check_value.parse::<f64>().ok()) {
            (Some(a), Some(b)) => apply(operator, a.partial_cmp(&b)),
            _ => operator == Operator::Ne,
        },
        Value::String(s) => match operator {
            Operator::Eq => s == check_value,
            Operator::Ne => s != check_value,
            _ => {
                let ordering = match (s.trim().parse::<f64>(), check_value.parse::<f64>()) {
                    (Ok(a), Ok(b)) => a.partial_cmp(&b),
                    _ => Some(s.as_str().cmp(check_value)),
                };
                apply(operator, ordering)
            }
        },
        Value::Bool(b) => match parse_bool(check_value) {
            Some(target) => match operator {
                Operator::Eq => *b == target,
                Operator::Ne => *b != target,
                _ => false,
            },
            None => operator == Operator::Ne,
        },
        other => match operator {
            Operator::Eq => other.to_string() == check_value,
            Operator::Ne => other.to_string() != check_value,
            _ => false,
        },
    }
}

fn apply(operator: Operator, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match operator {
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ne => ordering != Ordering::Equal,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Ge => ordering != Ordering::Less,
        Operator::Le => ordering != Ordering::Greater,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
