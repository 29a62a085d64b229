//! Engine-internal step handlers
//!
//! These need no external collaborator: they work on the execution's own
//! variables and prior results.

use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::{json, Value};

use crate::execution::error::StepError;
use crate::workflow::condition::{coerce_number, coerce_string, compare, evaluate};
use crate::workflow::resolver::lookup;
use crate::workflow::{Condition, ConditionOperator, Results, StepConfig, Variables};

use super::StepHandler;

/// Map, filter or reduce over a prior step's output (or a variable).
///
/// | key        | meaning                                              |
/// |------------|------------------------------------------------------|
/// | `source`   | step id or variable name holding a list              |
/// | `operation`| `map`, `filter` or `reduce`                          |
/// | `field`    | item field to project, test or aggregate (dotted ok) |
/// | `operator` | filter operator, same names as conditions            |
/// | `value`    | filter operand                                       |
/// | `reducer`  | `sum`, `count`, `min`, `max` or `concat`             |
/// | `separator`| joiner used by `concat`                              |
#[derive(Debug, Clone, Copy, Default)]
pub struct DataTransformHandler;

#[async_trait]
impl StepHandler for DataTransformHandler {
    async fn execute(
        &self,
        config: &StepConfig,
        variables: &Variables,
        results: &Results,
    ) -> Result<Value, StepError> {
        let source = config.require_str("source")?;
        let input = results
            .get(source)
            .or_else(|| lookup(source, variables, results))
            .ok_or_else(|| StepError::missing_input(source))?;

        let items = input
            .as_array()
            .ok_or_else(|| StepError::invalid_config("source", format!("'{}' is not a list", source)))?;
        let field = config.str("field")?;

        match config.require_str("operation")? {
            "map" => {
                let field = field.ok_or_else(|| StepError::invalid_config("field", "required field is missing"))?;
                Ok(Value::Array(
                    items
                        .iter()
                        .map(|item| field_of(item, Some(field)).cloned().unwrap_or(Value::Null))
                        .collect(),
                ))
            }
            "filter" => {
                let operator = parse_operator(config, ConditionOperator::Exists)?;
                let operand = config.get("value").cloned().unwrap_or(Value::Null);
                Ok(Value::Array(
                    items
                        .iter()
                        .filter(|item| compare(field_of(item, field), operator, &operand))
                        .cloned()
                        .collect(),
                ))
            }
            "reduce" => {
                let values: Vec<&Value> = items
                    .iter()
                    .filter_map(|item| field_of(item, field))
                    .filter(|v| !v.is_null())
                    .collect();
                reduce(config, &values)
            }
            other => Err(StepError::invalid_config(
                "operation",
                format!("unknown operation '{}'", other),
            )),
        }
    }
}

/// Item itself when no field is given, otherwise the (dotted) field.
fn field_of<'a>(item: &'a Value, field: Option<&str>) -> Option<&'a Value> {
    let Some(path) = field else {
        return Some(item);
    };

    path.split('.').try_fold(item, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    })
}

fn reduce(config: &StepConfig, values: &[&Value]) -> Result<Value, StepError> {
    let numbers = || values.iter().filter_map(|v| coerce_number(v));

    let reduced = match config.str("reducer")?.unwrap_or("count") {
        "count" => json!(values.len()),
        "sum" => json!(numbers().sum::<f64>()),
        "min" => numbers().reduce(f64::min).map(|n| json!(n)).unwrap_or(Value::Null),
        "max" => numbers().reduce(f64::max).map(|n| json!(n)).unwrap_or(Value::Null),
        "concat" => {
            let separator = config.str("separator")?.unwrap_or("");
            let parts: Vec<String> = values.iter().map(|v| coerce_string(v)).collect();
            json!(parts.join(separator))
        }
        other => {
            return Err(StepError::invalid_config(
                "reducer",
                format!("unknown reducer '{}'", other),
            ))
        }
    };
    Ok(reduced)
}

/// Parses the `operator` key; unknown names become a never-matching operator.
fn parse_operator(config: &StepConfig, default: ConditionOperator) -> Result<ConditionOperator, StepError> {
    Ok(match config.str("operator")? {
        Some(name) => serde_json::from_value(Value::String(name.to_string()))
            .unwrap_or(ConditionOperator::Unknown),
        None => default,
    })
}

/// Evaluates `field` `operator` `value` and returns the boolean.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionHandler;

#[async_trait]
impl StepHandler for ConditionHandler {
    async fn execute(
        &self,
        config: &StepConfig,
        variables: &Variables,
        results: &Results,
    ) -> Result<Value, StepError> {
        let condition = Condition::new(
            config.require_str("field")?,
            parse_operator(config, ConditionOperator::Equals)?,
            config.get("value").cloned().unwrap_or(Value::Null),
        );
        Ok(Value::Bool(evaluate(&condition, variables, results)))
    }
}

/// Logs a message at the configured level.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationHandler;

#[async_trait]
impl StepHandler for NotificationHandler {
    async fn execute(
        &self,
        config: &StepConfig,
        _variables: &Variables,
        _results: &Results,
    ) -> Result<Value, StepError> {
        let message = config.require_str("message")?;
        let level = config.str("level")?.unwrap_or("info");

        match level {
            "info" => info!("{}", message),
            "warning" => warn!("{}", message),
            "error" => error!("{}", message),
            other => {
                return Err(StepError::invalid_config(
                    "level",
                    format!("unknown level '{}'", other),
                ))
            }
        }

        Ok(json!({ "sent": true, "message": message, "level": level }))
    }
}
