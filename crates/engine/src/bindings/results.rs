use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use stepwise_types::{ExecutableResult, SystemProperty, Value};

use crate::error::{RuntimeError, RuntimeResult};
use crate::expression::{Scope, evaluate, expression_body};

/// Pick the first result whose condition holds.
///
/// Conditions are evaluated in declaration order against `prior_context`
/// overlaid with `current_variables`. A result without a condition always
/// matches. When none matches, `default_result` is returned unchanged; `None`
/// means no result applies.
///
/// # Arguments
/// * `prior_context` - Variables of the finishing executable.
/// * `current_variables` - Action outputs, shadowing `prior_context`.
/// * `system_properties` - Properties reachable through `get_sp`.
/// * `results` - Candidate results in declaration order.
/// * `default_result` - Result of the action, used when no candidate matches.
///
/// # Returns
/// The selected result name, or `None` when no result applies.
///
/// # Errors
/// [`RuntimeError::ResultResolution`] when a condition is not boolean, and
/// [`RuntimeError::Binding`] when it cannot be evaluated.
pub fn resolve_result(
    prior_context: &IndexMap<String, Value>,
    current_variables: &IndexMap<String, Value>,
    system_properties: &[SystemProperty],
    results: &[ExecutableResult],
    default_result: Option<&str>,
) -> RuntimeResult<Option<String>> {
    let scope = Scope::new(system_properties)
        .with_layer(prior_context)
        .with_layer(current_variables);

    for result in results {
        let Some(condition) = &result.value else {
            return Ok(Some(result.name.clone()));
        };
        let outcome = match expression_body(condition) {
            Some(body) => evaluate(body, &scope)
                .map_err(|error| RuntimeError::binding(&result.name, error))?
                .into_content(),
            None => condition.content().clone(),
        };
        if as_boolean(&result.name, &outcome)? {
            return Ok(Some(result.name.clone()));
        }
    }

    Ok(default_result.map(str::to_string))
}

fn as_boolean(name: &str, outcome: &JsonValue) -> RuntimeResult<bool> {
    match outcome {
        JsonValue::Bool(flag) => Ok(*flag),
        JsonValue::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        JsonValue::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(RuntimeError::ResultResolution {
            name: name.to_string(),
            actual: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    fn result(name: &str, condition: &str) -> ExecutableResult {
        ExecutableResult::new(name, Some(Value::new(condition)))
    }

    #[test]
    fn first_true_literal_wins() {
        let results = vec![result("FAILURE", "false"), result("SUCCESS", "true")];

        let resolved = resolve_result(&IndexMap::new(), &IndexMap::new(), &[], &results, None).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("SUCCESS"));
    }

    #[test]
    fn expressions_see_current_variables_over_prior_context() {
        let prior = indexmap! { "code".to_string() => Value::new(500) };
        let current = indexmap! { "code".to_string() => Value::new(200) };
        let results = vec![result("OK", "${ code == 200 }"), result("ERROR", "${ code >= 400 }")];

        let resolved = resolve_result(&prior, &current, &[], &results, None).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("OK"));
    }

    #[test]
    fn falls_back_to_default_or_none() {
        let results = vec![result("NEVER", "False")];

        let with_default = resolve_result(&IndexMap::new(), &IndexMap::new(), &[], &results, Some("FAILURE")).expect("resolve");
        assert_eq!(with_default.as_deref(), Some("FAILURE"));
        let without_default = resolve_result(&IndexMap::new(), &IndexMap::new(), &[], &results, None).expect("resolve");
        assert_eq!(without_default, None);
    }

    #[test]
    fn unconditional_result_always_matches() {
        let results = vec![result("FIRST", "false"), ExecutableResult::new("CATCH_ALL", None)];

        let resolved = resolve_result(&IndexMap::new(), &IndexMap::new(), &[], &results, Some("DEFAULT")).expect("resolve");
        assert_eq!(resolved.as_deref(), Some("CATCH_ALL"));
    }

    #[test]
    fn non_boolean_conditions_are_rejected() {
        let results = vec![result("ODD", "${ 1 + 1 }")];

        let error = resolve_result(&IndexMap::new(), &IndexMap::new(), &[], &results, None).expect_err("not boolean");
        assert!(matches!(error, RuntimeError::ResultResolution { ref name, ref actual } if name == "ODD" && actual == "2"));
    }
}
