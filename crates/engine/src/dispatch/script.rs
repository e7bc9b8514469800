//! SCRIPTED backend: runs script text through a [`ScriptInterpreter`].

use indexmap::IndexMap;
use stepwise_types::Value;
use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::script::{ScriptBinding, ScriptInterpreter};

/// Evaluate `script` seeded with the call arguments and collect its
/// top-level bindings as outputs.
///
/// Unserializable bindings are dropped unless the interpreter marks them
/// exportable or they shadow a call argument, in which case the caller
/// expected a value and the action fails.
pub fn execute_script(
    interpreter: &dyn ScriptInterpreter,
    script: Option<&str>,
    call_arguments: &IndexMap<String, Value>,
) -> RuntimeResult<IndexMap<String, Value>> {
    let script = script.ok_or(RuntimeError::MissingScript)?;
    if script.trim().is_empty() {
        return Err(RuntimeError::EmptyScript);
    }

    let missing: Vec<String> = interpreter
        .required_bindings(script)?
        .into_iter()
        .filter(|name| !call_arguments.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(RuntimeError::MissingRequiredInput { names: missing });
    }

    let bindings = interpreter.execute(script, call_arguments)?;
    let mut outputs = IndexMap::with_capacity(bindings.len());
    for (name, binding) in bindings {
        match binding {
            ScriptBinding::Serializable(value) => {
                let sensitive = call_arguments.get(&name).is_some_and(Value::is_sensitive);
                outputs.insert(name, value.with_sensitivity(sensitive));
            }
            ScriptBinding::Unserializable { type_name, exportable } => {
                if exportable || call_arguments.contains_key(&name) {
                    return Err(RuntimeError::Serialization {
                        variable: name,
                        type_name,
                    });
                }
                warn!(variable = %name, type_name = %type_name, "dropping unserializable script variable");
            }
        }
    }
    debug!(outputs = outputs.len(), "script evaluated");
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::LineScriptInterpreter;
    use indexmap::indexmap;
    use serde_json::json;

    fn run(script: Option<&str>, arguments: IndexMap<String, Value>) -> RuntimeResult<IndexMap<String, Value>> {
        execute_script(&LineScriptInterpreter::new(), script, &arguments)
    }

    #[test]
    fn missing_and_blank_scripts_are_rejected() {
        assert!(matches!(run(None, IndexMap::new()), Err(RuntimeError::MissingScript)));
        assert!(matches!(run(Some("  \n\t"), IndexMap::new()), Err(RuntimeError::EmptyScript)));
    }

    #[test]
    fn unbound_reads_fail_before_evaluation() {
        let error = run(Some("total = price * quantity"), indexmap! { "price".to_string() => Value::new(3_i64) })
            .expect_err("missing quantity");
        match error {
            RuntimeError::MissingRequiredInput { names } => assert_eq!(names, vec!["quantity".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn outputs_keep_argument_sensitivity_and_drop_private_objects() {
        let arguments = indexmap! {
            "token".to_string() => Value::sensitive("abc"),
            "host".to_string() => Value::new("db.internal"),
        };
        let outputs = run(Some("import os\ntoken = token + '-signed'\nurl = 'https://' + host"), arguments)
            .expect("script outputs");

        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["token", "host", "url"]);
        assert!(outputs["token"].is_sensitive());
        assert_eq!(outputs["token"].content(), &json!("abc-signed"));
        assert!(!outputs["url"].is_sensitive());
    }

    #[test]
    fn outputs_derived_from_secrets_are_sensitive() {
        let arguments = indexmap! { "token".to_string() => Value::sensitive("hunter2") };
        let outputs = run(Some("header = 'Bearer ' + token"), arguments).expect("script outputs");

        assert!(outputs["header"].is_sensitive());
        assert_eq!(outputs["header"].masked(), json!("********"));
    }

    #[test]
    fn exportable_or_shadowing_objects_fail_serialization() {
        let error = run(Some("stamp = now()"), IndexMap::new()).expect_err("exportable datetime");
        assert!(matches!(error, RuntimeError::Serialization { ref variable, .. } if variable == "stamp"));

        let error = run(Some("import json\nhost = json"), indexmap! { "host".to_string() => Value::new("x") })
            .expect_err("shadowed argument");
        assert!(matches!(error, RuntimeError::Serialization { ref variable, .. } if variable == "host"));
    }

    #[test]
    fn runtime_failures_are_script_errors() {
        let error = run(Some("x = 1 / 0"), IndexMap::new()).expect_err("division by zero");
        assert!(matches!(error, RuntimeError::ScriptFailed(_)));
    }
}
