use indexmap::IndexMap;
use stepwise_types::{Input, Prompt, SystemProperty, Value};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::expression::{Scope, evaluate, expression_body, resolve_declared};

/// Prompt answers and prompt settings for input binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSettings {
    /// Values the user entered, keyed by input name.
    pub answers: IndexMap<String, Value>,
    /// Prompts supplied by the calling step; they replace an input's declared prompt.
    pub overrides: IndexMap<String, Prompt>,
    /// Bind unanswered prompted inputs to an empty string instead of asking.
    pub use_empty_values: bool,
}

impl PromptSettings {
    pub fn with_answer(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.answers.insert(name.into(), value.into());
        self
    }
}

/// Bind declared inputs against the caller-supplied `context`.
///
/// Inputs are processed in declaration order:
///
/// 1. Unless the input is private, a non-empty caller value of the same name wins.
/// 2. Otherwise the declared value is used; expressions see `context`
///    overlaid with the inputs bound so far, and an undefined name yields no value.
/// 3. An empty result on a required input is recorded as missing; an empty
///    optional input binds to null.
/// 4. A non-empty value must satisfy the declared input type.
///
/// Missing inputs are collected and reported together once every input has
/// been processed.
///
/// # Arguments
/// * `inputs` - Declarations in binding order.
/// * `context` - Caller values, usually the call arguments over the parent's variables.
/// * `system_properties` - Properties reachable through `get_sp`.
///
/// # Returns
/// The bound values keyed by input name, in declaration order.
///
/// # Errors
/// [`RuntimeError::MissingRequiredInput`], [`RuntimeError::TypeMismatch`], or
/// [`RuntimeError::Binding`] for expression failures other than undefined names.
/// Inputs that declare a prompt fail with [`RuntimeError::MissingInputsWithPrompt`];
/// use [`bind_inputs_with_prompts`] to supply answers.
pub fn bind_inputs(
    inputs: &[Input],
    context: &IndexMap<String, Value>,
    system_properties: &[SystemProperty],
) -> RuntimeResult<IndexMap<String, Value>> {
    bind_inputs_with_prompts(inputs, context, &mut PromptSettings::default(), system_properties)
}

/// Bind declared inputs, taking values for prompted inputs from `prompts`.
///
/// An input with a prompt (declared or overridden) is never reported as a
/// plain missing input. When the user has answered it, the answer is bound;
/// an answer is marked sensitive when the declared or caller value is, and the
/// marked answer is written back to `prompts`. Unanswered prompted inputs are
/// collected with their prompt expressions resolved, unless
/// `use_empty_values` binds them to an empty string.
///
/// # Arguments
/// * `inputs` - Declarations in binding order.
/// * `context` - Caller values.
/// * `prompts` - Answers and prompt settings; answers may be updated in place.
/// * `system_properties` - Properties reachable through `get_sp`.
///
/// # Returns
/// The bound values keyed by input name, in declaration order.
///
/// # Errors
/// The errors of [`bind_inputs`]. Missing required inputs are reported before
/// inputs awaiting a prompt answer.
pub fn bind_inputs_with_prompts(
    inputs: &[Input],
    context: &IndexMap<String, Value>,
    prompts: &mut PromptSettings,
    system_properties: &[SystemProperty],
) -> RuntimeResult<IndexMap<String, Value>> {
    let mut bound = IndexMap::with_capacity(inputs.len());
    let mut missing = Vec::new();
    let mut awaiting_prompt = Vec::new();

    for declared in inputs {
        let overridden;
        let input = match prompts.overrides.get(&declared.name) {
            Some(prompt) => {
                overridden = declared.clone().with_prompt(prompt.clone());
                &overridden
            }
            None => declared,
        };

        let answer = prompts.answers.get(&input.name).cloned();
        let value = match answer {
            Some(answer) => {
                let answer = answer.with_sensitivity(!input.private_input && inherits_sensitivity(input, context));
                prompts.answers.insert(input.name.clone(), answer.clone());
                answer
            }
            None => input_value(input, context, &bound, system_properties)?,
        }
        .with_sensitivity(input.sensitive);

        if input.has_prompt() && !prompts.answers.contains_key(&input.name) {
            if !prompts.use_empty_values {
                awaiting_prompt.push(awaiting(input, value, context, &bound, system_properties)?);
                continue;
            }
            if value.is_null() {
                bound.insert(input.name.clone(), Value::new("").with_sensitivity(input.sensitive));
                continue;
            }
        }

        if value.is_empty() {
            if input.has_prompt() {
                bound.insert(input.name.clone(), value);
            } else if input.required {
                missing.push(input.name.clone());
            } else {
                bound.insert(input.name.clone(), Value::null().with_sensitivity(input.sensitive));
            }
            continue;
        }

        if !input.input_type.accepts(&value) {
            return Err(RuntimeError::type_mismatch(
                &input.name,
                input.input_type.as_str(),
                value.value_type().as_str(),
            ));
        }
        bound.insert(input.name.clone(), value);
    }

    if !missing.is_empty() {
        return Err(RuntimeError::MissingRequiredInput { names: missing });
    }
    if !awaiting_prompt.is_empty() {
        debug!(count = awaiting_prompt.len(), "inputs awaiting prompt answers");
        return Err(RuntimeError::MissingInputsWithPrompt { inputs: awaiting_prompt });
    }

    debug!(count = bound.len(), "inputs bound");
    Ok(bound)
}

fn inherits_sensitivity(input: &Input, context: &IndexMap<String, Value>) -> bool {
    input.value.as_ref().is_some_and(Value::is_sensitive) || context.get(&input.name).is_some_and(Value::is_sensitive)
}

/// Copy of `input` carrying its current value and a resolved prompt.
fn awaiting(
    input: &Input,
    value: Value,
    context: &IndexMap<String, Value>,
    bound: &IndexMap<String, Value>,
    system_properties: &[SystemProperty],
) -> RuntimeResult<Input> {
    let scope = Scope::new(system_properties).with_layer(context).with_layer(bound);
    let resolve = |declared: &Option<Value>| -> RuntimeResult<Option<Value>> {
        let Some(declared) = declared else {
            return Ok(None);
        };
        match resolve_declared(declared, &scope) {
            Ok(resolved) => Ok(Some(resolved)),
            Err(error) if error.is_unresolved() => Ok(Some(declared.clone())),
            Err(error) => Err(RuntimeError::binding(&input.name, error)),
        }
    };

    let mut pending = input.clone();
    if let Some(prompt) = &input.prompt {
        pending.prompt = Some(Prompt {
            message: resolve(&prompt.message)?,
            options: resolve(&prompt.options)?,
            ..prompt.clone()
        });
    }
    pending.value = (!value.is_null()).then_some(value);
    Ok(pending)
}

fn input_value(
    input: &Input,
    context: &IndexMap<String, Value>,
    bound: &IndexMap<String, Value>,
    system_properties: &[SystemProperty],
) -> RuntimeResult<Value> {
    if !input.private_input
        && let Some(caller_value) = context.get(&input.name)
        && !caller_value.is_empty()
    {
        return Ok(caller_value.clone());
    }

    let Some(declared) = &input.value else {
        return Ok(Value::null());
    };
    let Some(body) = expression_body(declared) else {
        return Ok(declared.clone());
    };

    let scope = Scope::new(system_properties).with_layer(context).with_layer(bound);
    match evaluate(body, &scope) {
        Ok(value) => Ok(value.with_sensitivity(declared.is_sensitive())),
        Err(error) if error.is_unresolved() => {
            debug!(input = %input.name, %error, "input expression unresolved");
            Ok(Value::null())
        }
        Err(error) => Err(RuntimeError::binding(&input.name, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use serde_json::json;
    use stepwise_types::{InputType, Prompt};

    fn no_context() -> IndexMap<String, Value> {
        IndexMap::new()
    }

    #[test]
    fn preserves_declaration_order_and_sees_earlier_inputs() {
        let inputs = vec![
            Input::new("zeta").with_value("first"),
            Input::new("alpha").with_value("${ zeta + '-second' }"),
            Input::new("mid").with_value("${ alpha + '-third' }"),
        ];

        let bound = bind_inputs(&inputs, &no_context(), &[]).expect("bind inputs");

        assert_eq!(bound.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(bound["mid"], Value::new("first-second-third"));
    }

    #[test]
    fn caller_values_win_unless_input_is_private() {
        let context = indexmap! {
            "host".to_string() => Value::new("caller"),
            "port".to_string() => Value::new("9999"),
        };
        let inputs = vec![
            Input::new("host").with_value("default"),
            Input::new("port").with_value("8080").private(),
        ];

        let bound = bind_inputs(&inputs, &context, &[]).expect("bind inputs");
        assert_eq!(bound["host"], Value::new("caller"));
        assert_eq!(bound["port"], Value::new("8080"));
    }

    #[test]
    fn empty_caller_value_falls_back_to_default() {
        let context = indexmap! { "host".to_string() => Value::new("") };
        let inputs = vec![Input::new("host").with_value("localhost")];

        let bound = bind_inputs(&inputs, &context, &[]).expect("bind inputs");
        assert_eq!(bound["host"], Value::new("localhost"));
    }

    #[test]
    fn collects_every_missing_required_input() {
        let inputs = vec![
            Input::new("first"),
            Input::new("present").with_value("here"),
            Input::new("second").with_value("${ undefined_name }"),
        ];

        let error = bind_inputs(&inputs, &no_context(), &[]).expect_err("missing inputs");
        match error {
            RuntimeError::MissingRequiredInput { names } => assert_eq!(names, vec!["first", "second"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_empty_input_binds_to_null() {
        let inputs = vec![Input::new("note").optional()];

        let bound = bind_inputs(&inputs, &no_context(), &[]).expect("bind inputs");
        assert!(bound["note"].is_null());
    }

    #[test]
    fn required_input_with_default_is_never_missing() {
        let inputs = vec![Input::new("retries").with_value(0_i64)];

        let bound = bind_inputs(&inputs, &no_context(), &[]).expect("bind inputs");
        assert_eq!(bound["retries"], Value::new(0));
    }

    #[test]
    fn sensitivity_comes_from_declaration_or_caller() {
        let context = indexmap! { "token".to_string() => Value::sensitive("abc") };
        let inputs = vec![
            Input::new("token"),
            Input::new("password").with_value("hunter2").sensitive(),
            Input::new("derived").with_value("${ token + '!' }"),
            Input::new("plain").with_value("visible"),
        ];

        let bound = bind_inputs(&inputs, &context, &[]).expect("bind inputs");
        assert!(bound["token"].is_sensitive());
        assert!(bound["password"].is_sensitive());
        assert!(bound["derived"].is_sensitive());
        assert!(!bound["plain"].is_sensitive());
    }

    #[test]
    fn rejects_values_of_the_wrong_type() {
        let context = indexmap! { "port".to_string() => Value::new("eighty") };
        let inputs = vec![Input::new("port").typed(InputType::Number)];

        let error = bind_inputs(&inputs, &context, &[]).expect_err("type mismatch");
        assert!(matches!(
            error,
            RuntimeError::TypeMismatch { ref name, ref expected, ref actual }
                if name == "port" && expected == "number" && actual == "string"
        ));
    }

    #[test]
    fn evaluation_errors_other_than_undefined_names_are_fatal() {
        let inputs = vec![Input::new("ratio").with_value("${ 1 / 0 }")];

        let error = bind_inputs(&inputs, &no_context(), &[]).expect_err("division by zero");
        assert!(matches!(error, RuntimeError::Binding { ref name, .. } if name == "ratio"));
    }

    #[test]
    fn integer_overflow_is_a_binding_error() {
        let context = indexmap! { "x".to_string() => Value::new(i64::MIN) };
        let inputs = vec![
            Input::new("remainder").with_value("${ x % -1 }"),
            Input::new("banner").with_value("${ 'ab' * 9223372036854775807 }"),
        ];

        let error = bind_inputs(&inputs, &context, &[]).expect_err("overflow");
        assert!(matches!(error, RuntimeError::Binding { ref name, .. } if name == "remainder"));

        let error = bind_inputs(&inputs[1..], &context, &[]).expect_err("oversized repeat");
        assert!(matches!(error, RuntimeError::Binding { ref name, .. } if name == "banner"));
    }

    #[test]
    fn unanswered_prompts_are_collected_with_resolved_messages() {
        let context = indexmap! { "env".to_string() => Value::new("prod") };
        let inputs = vec![
            Input::new("region").with_prompt(Prompt::text("${ 'Region for ' + env + '?' }")),
            Input::new("zone").with_value("a").with_prompt(Prompt::text("Zone?")),
            Input::new("owner").with_value("ops"),
        ];

        let error = bind_inputs(&inputs, &context, &[]).expect_err("prompts pending");
        let pending = match error {
            RuntimeError::MissingInputsWithPrompt { inputs } => inputs,
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(pending.iter().map(|input| input.name.as_str()).collect::<Vec<_>>(), vec!["region", "zone"]);
        let message = pending[0].prompt.as_ref().and_then(|prompt| prompt.message.clone());
        assert_eq!(message, Some(Value::new("Region for prod?")));
        assert_eq!(pending[1].value, Some(Value::new("a")));
    }

    #[test]
    fn answers_bind_prompted_inputs_and_inherit_sensitivity() {
        let context = indexmap! { "password".to_string() => Value::sensitive("") };
        let inputs = vec![
            Input::new("password").with_prompt(Prompt::text("Password?")),
            Input::new("region").with_prompt(Prompt::text("Region?")),
        ];
        let mut prompts = PromptSettings::default()
            .with_answer("password", "hunter2")
            .with_answer("region", "eu");

        let bound = bind_inputs_with_prompts(&inputs, &context, &mut prompts, &[]).expect("bind inputs");

        assert_eq!(bound["password"], Value::sensitive("hunter2"));
        assert_eq!(bound["region"], Value::new("eu"));
        assert!(prompts.answers["password"].is_sensitive());
    }

    #[test]
    fn overrides_and_empty_values_for_prompts() {
        let inputs = vec![Input::new("reason"), Input::new("note").optional()];
        let mut prompts = PromptSettings {
            overrides: indexmap! { "reason".to_string() => Prompt::text("Why?") },
            use_empty_values: true,
            ..PromptSettings::default()
        };

        let bound = bind_inputs_with_prompts(&inputs, &no_context(), &mut prompts, &[]).expect("bind inputs");
        assert_eq!(bound["reason"], Value::new(""));
        assert!(bound["note"].is_null());

        prompts.use_empty_values = false;
        let error = bind_inputs_with_prompts(&inputs, &no_context(), &mut prompts, &[]).expect_err("prompt pending");
        assert!(matches!(error, RuntimeError::MissingInputsWithPrompt { ref inputs } if inputs[0].name == "reason"));
    }

    #[test]
    fn system_properties_are_reachable() {
        let properties = vec![SystemProperty::new("net", "host", "example.org")];
        let inputs = vec![Input::new("host").with_value("${ get_sp('net.host') }")];

        let bound = bind_inputs(&inputs, &no_context(), &properties).expect("bind inputs");
        assert_eq!(bound["host"].content(), &json!("example.org"));
    }
}
