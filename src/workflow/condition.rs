//! Condition Evaluation
//!
//! Pure predicate evaluation used to gate steps and by `condition` steps.
//! Evaluation never fails: anything that cannot be compared is false.

use serde_json::Value;

use super::model::{Condition, ConditionOperator, Results, Variables};
use super::resolver::lookup;

/// Evaluates a condition against the current variables and prior outputs.
pub fn evaluate(condition: &Condition, variables: &Variables, results: &Results) -> bool {
    let left = lookup(&condition.field, variables, results);
    compare(left, condition.operator, &condition.value)
}

/// Applies `operator` to a (possibly missing) left operand and a literal.
pub fn compare(left: Option<&Value>, operator: ConditionOperator, right: &Value) -> bool {
    match operator {
        ConditionOperator::Exists => left.is_some_and(|v| !v.is_null()),
        ConditionOperator::Equals => left.is_some_and(|v| values_equal(v, right)),
        ConditionOperator::NotEquals => !left.is_some_and(|v| values_equal(v, right)),
        ConditionOperator::Contains => left.is_some_and(|v| coerce_string(v).contains(&coerce_string(right))),
        ConditionOperator::GreaterThan => numeric_pair(left, right).is_some_and(|(l, r)| l > r),
        ConditionOperator::LessThan => numeric_pair(left, right).is_some_and(|(l, r)| l < r),
        ConditionOperator::Unknown => false,
    }
}

/// Equality where numbers compare by value (`1 == 1.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// String form used for containment checks. Strings are taken verbatim,
/// everything else uses its JSON text.
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric form of a value; numeric strings are parsed.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn numeric_pair(left: Option<&Value>, right: &Value) -> Option<(f64, f64)> {
    Some((coerce_number(left?)?, coerce_number(right)?))
}
