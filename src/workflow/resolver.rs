//! Variable Resolution
//!
//! Substitutes `${name}` placeholders in step configuration with values from
//! the execution's variables or from prior step outputs.
//!
//! Only whole-value placeholders are recognised: a string must consist of a
//! single `${...}` and nothing else. `"prefix ${name}"` is left untouched.
//! Names may use dots to reach into nested values (`${search.items.0}`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::model::{Results, StepConfig, Variables};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\{\s*([^${}\s]+)\s*\}$").expect("placeholder pattern is valid")
});

/// Returns the placeholder name if `text` is exactly one `${name}`.
pub fn placeholder_name(text: &str) -> Option<&str> {
    PLACEHOLDER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Looks a name up in the variables first, then in the prior results.
///
/// A dotted name that has no exact match is resolved by taking the first
/// segment as the root and walking object keys or array indices.
pub fn lookup<'a>(name: &str, variables: &'a Variables, results: &'a Results) -> Option<&'a Value> {
    if let Some(value) = variables.get(name).or_else(|| results.get(name)) {
        return Some(value);
    }

    let mut segments = name.split('.');
    let root = segments.next()?;
    let mut current = variables.get(root).or_else(|| results.get(root))?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Resolves a single value, recursing into lists and objects.
///
/// Unknown placeholders are kept literally.
pub fn resolve_value(value: &Value, variables: &Variables, results: &Results) -> Value {
    match value {
        Value::String(text) => match placeholder_name(text) {
            Some(name) => lookup(name, variables, results)
                .cloned()
                .unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, variables, results))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_value(item, variables, results)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolves every value of a step configuration.
pub fn resolve_config(config: &StepConfig, variables: &Variables, results: &Results) -> StepConfig {
    config
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, variables, results)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixtures() -> (Variables, Results) {
        let mut variables = Variables::new();
        variables.insert("topic".to_string(), json!("rust"));
        variables.insert("shared".to_string(), json!("from-variables"));

        let mut results = Results::new();
        results.insert("search".to_string(), json!({"items": ["a", "b"], "total": 2}));
        results.insert("shared".to_string(), json!("from-results"));
        (variables, results)
    }

    #[test]
    fn test_placeholder_name() {
        assert_eq!(placeholder_name("${topic}"), Some("topic"));
        assert_eq!(placeholder_name("${ topic }"), Some("topic"));
        assert_eq!(placeholder_name("about ${topic}"), None);
        assert_eq!(placeholder_name("${a}${b}"), None);
        assert_eq!(placeholder_name("topic"), None);
    }

    #[test]
    fn test_resolve_from_variables() {
        let (variables, results) = fixtures();
        let resolved = resolve_value(&json!("${topic}"), &variables, &results);
        assert_eq!(resolved, json!("rust"));
    }

    #[test]
    fn test_variables_take_precedence_over_results() {
        let (variables, results) = fixtures();
        let resolved = resolve_value(&json!("${shared}"), &variables, &results);
        assert_eq!(resolved, json!("from-variables"));
    }

    #[test]
    fn test_resolve_from_prior_output() {
        let (variables, results) = fixtures();
        let resolved = resolve_value(&json!("${search}"), &variables, &results);
        assert_eq!(resolved["total"], json!(2));
    }

    #[test]
    fn test_resolve_nested_path() {
        let (variables, results) = fixtures();
        assert_eq!(resolve_value(&json!("${search.total}"), &variables, &results), json!(2));
        assert_eq!(resolve_value(&json!("${search.items.1}"), &variables, &results), json!("b"));
    }

    #[test]
    fn test_unknown_placeholder_left_literal() {
        let (variables, results) = fixtures();
        let resolved = resolve_value(&json!("${missing}"), &variables, &results);
        assert_eq!(resolved, json!("${missing}"));
    }

    #[test]
    fn test_partial_interpolation_not_supported() {
        let (variables, results) = fixtures();
        let resolved = resolve_value(&json!("learn ${topic} today"), &variables, &results);
        assert_eq!(resolved, json!("learn ${topic} today"));
    }

    #[test]
    fn test_resolve_config_recurses() {
        let (variables, results) = fixtures();
        let config = StepConfig::new()
            .with("query", "${topic}")
            .with("limit", 3)
            .with("params", json!({"q": "${topic}", "tags": ["${shared}", "x"]}));

        let resolved = resolve_config(&config, &variables, &results);
        assert_eq!(resolved.get("query"), Some(&json!("rust")));
        assert_eq!(resolved.get("limit"), Some(&json!(3)));
        assert_eq!(
            resolved.get("params"),
            Some(&json!({"q": "rust", "tags": ["from-variables", "x"]}))
        );
    }
}
