//! Action dispatcher.
//!
//! An action is the leaf of an executable: it consumes the call arguments
//! published by the lifecycle controller, runs one of three backends and
//! leaves its outputs in the return-values slot for the controller's finish
//! phase. Every dispatch emits `EVENT_ACTION_START` followed by exactly one of
//! `EVENT_ACTION_END` or `EVENT_ACTION_ERROR`; dependency resolution happens
//! before the start event, so a resolution failure emits nothing.

pub mod dependency;
pub mod native;
pub mod script;
pub mod sequential;
pub mod session;

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stepwise_types::events::keys;
use stepwise_types::{ActionType, EventType, StepType, Value};
use stepwise_util::{RuntimeSettings, redact_sensitive};
use tracing::{debug, warn};

use self::dependency::{DependencyResolver, NoDependencies};
use self::native::{RoutineRegistry, execute_native};
use self::script::execute_script;
use self::sequential::{
    SequentialExecutionService, SequentialParameters, SequentialStep, UnsupportedSequentialExecution, execute_sequential,
};
use self::session::SessionObjects;
use crate::env::{ReturnValues, RunEnvironment};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::{EventPayload, ExecutionRuntimeServices};
use crate::pool::SlotPool;
use crate::script::{LineScriptInterpreter, ScriptInterpreter};

const DEFAULT_ACTION_NAME: &str = "action";

/// Declarative description of one action, as compiled into an executable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDescriptor {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Artifact coordinate the action's code comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitive_dependencies: Vec<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<SequentialStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

impl ActionDescriptor {
    fn with_type(action_type: ActionType) -> Self {
        Self {
            action_type,
            routine_id: None,
            method_name: None,
            script: None,
            dependency: None,
            transitive_dependencies: Vec::new(),
            external: false,
            steps: Vec::new(),
            context_token: None,
            step_name: None,
        }
    }

    pub fn native(routine_id: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            routine_id: Some(routine_id.into()),
            method_name: Some(method_name.into()),
            ..Self::with_type(ActionType::Native)
        }
    }

    pub fn scripted(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            ..Self::with_type(ActionType::Scripted)
        }
    }

    pub fn sequential(coordinate: impl Into<String>, steps: Vec<SequentialStep>) -> Self {
        Self {
            dependency: Some(coordinate.into()),
            steps,
            ..Self::with_type(ActionType::Sequential)
        }
    }

    pub fn with_dependency(mut self, coordinate: impl Into<String>, transitive: Vec<String>) -> Self {
        self.dependency = Some(coordinate.into());
        self.transitive_dependencies = transitive;
        self
    }

    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_context_token(mut self, token: impl Into<String>) -> Self {
        self.context_token = Some(token.into());
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    fn name(&self) -> &str {
        self.step_name.as_deref().unwrap_or(DEFAULT_ACTION_NAME)
    }
}

/// Runs actions against the configured backends.
///
/// Scripted and sequential backends are bounded by separate slot pools so a
/// burst of one kind cannot starve the other.
#[derive(Clone)]
pub struct ActionDispatcher {
    routines: RoutineRegistry,
    interpreter: Arc<dyn ScriptInterpreter>,
    sequential: Arc<dyn SequentialExecutionService>,
    dependencies: Arc<dyn DependencyResolver>,
    script_pool: SlotPool,
    sequential_pool: SlotPool,
}

impl ActionDispatcher {
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            routines: RoutineRegistry::new(),
            interpreter: Arc::new(LineScriptInterpreter::new()),
            sequential: Arc::new(UnsupportedSequentialExecution),
            dependencies: Arc::new(NoDependencies),
            script_pool: SlotPool::new("script", settings.script_slots),
            sequential_pool: SlotPool::new("sequential", settings.sequential_slots),
        }
    }

    pub fn with_routines(mut self, routines: RoutineRegistry) -> Self {
        self.routines = routines;
        self
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn ScriptInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_sequential_service(mut self, service: Arc<dyn SequentialExecutionService>) -> Self {
        self.sequential = service;
        self
    }

    pub fn with_dependency_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.dependencies = resolver;
        self
    }

    pub fn script_pool(&self) -> &SlotPool {
        &self.script_pool
    }

    pub fn sequential_pool(&self) -> &SlotPool {
        &self.sequential_pool
    }

    /// Execute `action` with the pending call arguments.
    ///
    /// On success the outputs are stored as `ReturnValues(outputs, None)` and
    /// the next-step position is set. On failure `EVENT_ACTION_ERROR` is
    /// emitted and the error returned; the return-values slot is untouched.
    ///
    /// # Arguments
    /// * `services` - Sink for the action events.
    /// * `run_env` - Run state; the call arguments are consumed from it.
    /// * `sessions` - Non-serializable session objects shared with native routines.
    /// * `next_step_position` - Continuation recorded when the action succeeds.
    /// * `action` - What to run and on which backend.
    ///
    /// # Returns
    /// `Ok(())` once the outputs are in the return-value slot.
    pub fn dispatch(
        &self,
        services: &mut ExecutionRuntimeServices,
        run_env: &mut RunEnvironment,
        sessions: &mut SessionObjects,
        next_step_position: Option<u64>,
        action: &ActionDescriptor,
    ) -> RuntimeResult<()> {
        self.resolve_dependencies(action)?;

        let call_arguments = run_env.remove_call_arguments()?;
        let name = action.name();
        let payload = self
            .payload(run_env, name, "Action started")
            .with_values(keys::CALL_ARGUMENTS, &call_arguments);
        services.emit(EventType::ActionStart, payload);

        match self.execute(run_env, sessions, action, call_arguments) {
            Ok(outputs) => {
                let payload = self
                    .payload(run_env, name, "Action finished")
                    .with_values(keys::OUTPUTS, &outputs)
                    .with(keys::NEXT_STEP_POSITION, json!(next_step_position));
                run_env.put_return_values(ReturnValues::new(outputs, None));
                services.emit(EventType::ActionEnd, payload);
                run_env.set_next_step_position(next_step_position);
                Ok(())
            }
            Err(error) => {
                let message = redact_sensitive(&error.to_string());
                warn!(action = name, kind = action.action_type.as_str(), error = %message, "action failed");
                let payload = self
                    .payload(run_env, name, "Action failed")
                    .with(keys::EXCEPTION, json!(message));
                services.emit(EventType::ActionError, payload);
                Err(error)
            }
        }
    }

    fn resolve_dependencies(&self, action: &ActionDescriptor) -> RuntimeResult<()> {
        if action.action_type == ActionType::Sequential {
            return Ok(());
        }
        let Some(coordinate) = action.dependency.as_deref() else {
            return Ok(());
        };
        let resolved = self
            .dependencies
            .resolve(coordinate, &action.transitive_dependencies)
            .map_err(|source| RuntimeError::DependencyResolution {
                coordinate: coordinate.to_string(),
                source,
            })?;
        debug!(coordinate, resources = resolved.resources.len(), "dependencies resolved");
        Ok(())
    }

    fn execute(
        &self,
        run_env: &mut RunEnvironment,
        sessions: &mut SessionObjects,
        action: &ActionDescriptor,
        call_arguments: IndexMap<String, Value>,
    ) -> RuntimeResult<IndexMap<String, Value>> {
        debug!(kind = action.action_type.as_str(), arguments = call_arguments.len(), "dispatching action");
        match action.action_type {
            ActionType::Native => execute_native(
                &self.routines,
                action.routine_id.as_deref().unwrap_or_default(),
                action.method_name.as_deref().unwrap_or_default(),
                &call_arguments,
                sessions,
                run_env.serializable_data_mut(),
            ),
            ActionType::Scripted => {
                let _permit = self.script_pool.acquire()?;
                execute_script(self.interpreter.as_ref(), action.script.as_deref(), &call_arguments)
            }
            ActionType::Sequential => {
                let _permit = self.sequential_pool.acquire()?;
                let parameters = SequentialParameters {
                    external: action.external,
                    steps: action.steps.clone(),
                    arguments: call_arguments,
                };
                execute_sequential(
                    self.sequential.as_ref(),
                    action.dependency.as_deref().unwrap_or_default(),
                    parameters,
                    action.context_token.as_deref(),
                )
            }
        }
    }

    fn payload(&self, run_env: &RunEnvironment, name: &str, description: &str) -> EventPayload {
        EventPayload::new(name, StepType::Action, run_env.execution_path().current_path(), description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dependency::StaticDependencyResolver;
    use crate::dispatch::native::{Parameter, Routine, RoutineMethod};
    use crate::error::StackError;
    use indexmap::indexmap;
    use stepwise_types::SENSITIVE_VALUE_MASK;

    fn dispatcher() -> ActionDispatcher {
        let routines = RoutineRegistry::new().with_routine(
            "acme.Math",
            Routine::new()
                .with_method(
                    "double",
                    RoutineMethod::action(|call| {
                        let value = call.input("n").and_then(|value| value.content().as_i64()).unwrap_or(0);
                        Ok(indexmap! { "doubled".to_string() => Value::new(value * 2) })
                    })
                    .with_parameter(Parameter::input("n")),
                )
                .with_method(
                    "halt",
                    RoutineMethod::action(|call| match call.input_str("reason") {
                        Some(reason) => panic!("halted: {reason}"),
                        None => Ok(IndexMap::new()),
                    })
                    .with_parameter(Parameter::input("reason")),
                ),
        );
        ActionDispatcher::new(&RuntimeSettings::default()).with_routines(routines)
    }

    fn environment(arguments: IndexMap<String, Value>) -> RunEnvironment {
        let mut run_env = RunEnvironment::new(Vec::new());
        run_env.put_call_arguments(arguments);
        run_env
    }

    #[test]
    fn native_success_stores_outputs_and_emits_start_end() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(indexmap! { "n".to_string() => Value::new(21_i64) });
        let action = ActionDescriptor::native("acme.Math", "double").with_step_name("double it");

        dispatcher()
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), Some(3), &action)
            .expect("dispatch");

        assert_eq!(services.event_types(), vec![EventType::ActionStart, EventType::ActionEnd]);
        let end = &services.events()[1];
        assert_eq!(end.step_name(), Some("double it"));
        assert_eq!(end.get(keys::OUTPUTS), Some(&json!({ "doubled": 42 })));

        let returned = run_env.remove_return_values().expect("return values");
        assert_eq!(returned.outputs["doubled"], Value::new(42_i64));
        assert_eq!(returned.result, None);
        assert_eq!(run_env.next_step_position(), Some(3));
        assert!(run_env.call_arguments().is_none());
    }

    #[test]
    fn failures_emit_error_without_end() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(indexmap! { "secret".to_string() => Value::sensitive("pw") });
        let action = ActionDescriptor::native("acme.Missing", "run");

        let error = dispatcher()
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), Some(1), &action)
            .expect_err("missing routine");

        assert!(matches!(error, RuntimeError::RoutineNotFound { .. }));
        assert_eq!(services.event_types(), vec![EventType::ActionStart, EventType::ActionError]);
        assert_eq!(
            services.events()[0].get(keys::CALL_ARGUMENTS),
            Some(&json!({ "secret": SENSITIVE_VALUE_MASK }))
        );
        assert!(services.events()[1].get(keys::EXCEPTION).is_some());
        assert!(run_env.return_values().is_none());
        assert_eq!(run_env.next_step_position(), None);
    }

    #[test]
    fn panicking_routines_emit_an_error_event() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(indexmap! { "reason".to_string() => Value::new("disk full") });
        let action = ActionDescriptor::native("acme.Math", "halt");

        let error = dispatcher()
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), Some(2), &action)
            .expect_err("routine panic");

        assert!(matches!(error, RuntimeError::RoutineFailed { .. }));
        assert_eq!(services.event_types(), vec![EventType::ActionStart, EventType::ActionError]);
        let message = services.events()[1].get(keys::EXCEPTION).and_then(|value| value.as_str()).unwrap_or_default();
        assert!(message.contains("halted: disk full"));
        assert!(run_env.return_values().is_none());
    }

    #[test]
    fn script_values_derived_from_secrets_are_masked() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(indexmap! { "token".to_string() => Value::sensitive("hunter2") });
        let action = ActionDescriptor::scripted("header = 'Bearer ' + token\nscheme = 'Bearer'");

        dispatcher()
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), None, &action)
            .expect("dispatch");

        let end = &services.events()[1];
        assert_eq!(
            end.get(keys::OUTPUTS),
            Some(&json!({ "token": SENSITIVE_VALUE_MASK, "header": SENSITIVE_VALUE_MASK, "scheme": "Bearer" }))
        );
        let returned = run_env.return_values().expect("return values");
        assert!(returned.outputs["header"].is_sensitive());
        assert!(!returned.outputs["scheme"].is_sensitive());
    }

    #[test]
    fn dependency_failures_emit_nothing() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(IndexMap::new());
        let action = ActionDescriptor::scripted("x = 1").with_dependency("acme:lib:1.0", Vec::new());
        let dispatcher = dispatcher().with_dependency_resolver(Arc::new(StaticDependencyResolver::new()));

        let error = dispatcher
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), None, &action)
            .expect_err("unresolvable");

        assert!(matches!(error, RuntimeError::DependencyResolution { .. }));
        assert!(services.events().is_empty());
        assert!(run_env.call_arguments().is_some());
    }

    #[test]
    fn consuming_call_arguments_twice_is_an_error() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(IndexMap::new());
        let action = ActionDescriptor::scripted("x = 1");
        let dispatcher = dispatcher();

        dispatcher
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), None, &action)
            .expect("first dispatch");
        let error = dispatcher
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), None, &action)
            .expect_err("second dispatch");

        assert!(matches!(error, RuntimeError::Stack(StackError::EmptySlot { .. })));
    }

    #[test]
    fn scripted_actions_release_their_slot() {
        let mut services = ExecutionRuntimeServices::new();
        let mut run_env = environment(IndexMap::new());
        let dispatcher = dispatcher();
        let capacity = dispatcher.script_pool().capacity();

        dispatcher
            .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), None, &ActionDescriptor::scripted("x = 1 / 0"))
            .expect_err("script failure");

        assert_eq!(dispatcher.script_pool().available(), capacity);
    }

    #[test]
    fn descriptors_load_from_yaml() {
        let yaml = "type: SCRIPTED\nscript: |\n  x = 1\ndependency: acme:lib:1.0\n";
        let action: ActionDescriptor = serde_yaml::from_str(yaml).expect("descriptor");
        assert_eq!(action.action_type, ActionType::Scripted);
        assert_eq!(action.script.as_deref(), Some("x = 1\n"));
        assert!(!action.external);
    }
}
