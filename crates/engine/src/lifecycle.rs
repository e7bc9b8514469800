//! Executable lifecycle controller.
//!
//! Each flow, operation or decision invocation goes through
//! `start_executable` (bind inputs, push a context, publish call arguments)
//! and later `finish_executable` (bind outputs, resolve the result, pop the
//! context, publish return values). Binding failures are raised before the
//! stack is touched, so a failed phase never leaves a half-pushed or
//! half-popped frame.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::json;
use stepwise_types::events::keys;
use stepwise_types::{EventType, ExecutableResult, ExecutableType, Input, Output, StepType};
use tracing::debug;

use crate::bindings::{ReadOnlyContextAccessor, bind_arguments, bind_inputs_with_prompts, bind_outputs, resolve_result};
use crate::env::{Context, ExecutionPath, ReturnValues, RunEnvironment};
use crate::error::{RuntimeResult, StackError};
use crate::events::{EventPayload, ExecutionRuntimeServices};

/// Debugger hook consulted before an executable starts.
pub trait BreakpointHandler: Send + Sync {
    fn should_pause(&self, step_name: &str, run_env: &RunEnvironment) -> bool;
}

/// Never pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBreakpoints;

impl BreakpointHandler for NoBreakpoints {
    fn should_pause(&self, _: &str, _: &RunEnvironment) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A breakpoint was hit; the run environment is untouched.
    Paused,
}

#[derive(Debug, Clone)]
pub struct StartRequest<'a> {
    pub inputs: &'a [Input],
    pub step_name: &'a str,
    pub next_step_position: Option<u64>,
    pub executable_type: ExecutableType,
}

#[derive(Debug, Clone)]
pub struct FinishRequest<'a> {
    pub outputs: &'a [Output],
    pub results: &'a [ExecutableResult],
    pub step_name: &'a str,
    pub executable_type: ExecutableType,
}

#[derive(Clone)]
pub struct ExecutableController {
    breakpoints: Arc<dyn BreakpointHandler>,
}

impl Default for ExecutableController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableController {
    pub fn new() -> Self {
        Self {
            breakpoints: Arc::new(NoBreakpoints),
        }
    }

    pub fn with_breakpoints(mut self, handler: Arc<dyn BreakpointHandler>) -> Self {
        self.breakpoints = handler;
        self
    }

    /// Bind inputs (or debugger-modified arguments) and enter the executable.
    ///
    /// # Arguments
    /// * `request` - Declared inputs, step identity and the continuation to record.
    /// * `run_env` - Run state; pending call arguments and prompt answers are read from it.
    /// * `services` - Sink for the binding events.
    ///
    /// # Returns
    /// [`StartOutcome::Paused`] when a breakpoint defers the start, otherwise
    /// [`StartOutcome::Started`] with the bound inputs pushed as the new
    /// context and published as call arguments.
    ///
    /// # Errors
    /// Binding failures, including inputs awaiting a prompt answer. The stack,
    /// the execution path and the pending call arguments are left untouched,
    /// so the start can be retried once the answers are supplied.
    pub fn start_executable(
        &self,
        request: &StartRequest<'_>,
        run_env: &mut RunEnvironment,
        services: &mut ExecutionRuntimeServices,
    ) -> RuntimeResult<StartOutcome> {
        if self.breakpoints.should_pause(request.step_name, run_env) {
            debug!(step = request.step_name, "breakpoint hit; start deferred");
            return Ok(StartOutcome::Paused);
        }

        let step_type = StepType::from(request.executable_type);
        let bound = if run_env.is_context_modified() {
            let empty = IndexMap::new();
            let variables = run_env.top_variables().unwrap_or(&empty);
            let bound = bind_arguments(run_env.modified_arguments(), variables, run_env.system_properties())?;

            let payload = event_payload(run_env.execution_path(), request.step_name, step_type, "Modified arguments bound")
                .with_values(keys::BOUND_ARGUMENTS, &bound);
            services.emit(EventType::ArgumentEnd, payload);
            run_env.take_modified_arguments();
            run_env.set_context_modified(false);
            bound
        } else {
            let declared: Vec<&str> = request.inputs.iter().map(|input| input.name.as_str()).collect();
            let payload = event_payload(run_env.execution_path(), request.step_name, step_type, "Input binding started")
                .with(keys::INPUTS, json!(declared));
            services.emit(EventType::InputStart, payload);

            let mut context = run_env.top_variables().cloned().unwrap_or_default();
            if let Some(call_arguments) = run_env.call_arguments() {
                context.extend(call_arguments.iter().map(|(name, value)| (name.clone(), value.clone())));
            }
            let mut prompts = std::mem::take(run_env.prompts_mut());
            let bound = bind_inputs_with_prompts(request.inputs, &context, &mut prompts, run_env.system_properties());
            *run_env.prompts_mut() = prompts;
            let bound = bound?;
            run_env.take_call_arguments();

            let payload = event_payload(run_env.execution_path(), request.step_name, step_type, "Input binding finished")
                .with_values(keys::BOUND_INPUTS, &bound);
            services.emit(EventType::InputEnd, payload);
            bound
        };

        run_env.push_context(Context::new(bound.clone()));
        run_env.execution_path_mut().down();
        run_env.put_call_arguments(bound);
        if request.next_step_position.is_some() {
            run_env.set_next_step_position(request.next_step_position);
        }
        debug!(step = request.step_name, depth = run_env.stack().depth(), "executable started");
        Ok(StartOutcome::Started)
    }

    /// Bind outputs and the result, leave the executable and resolve the
    /// continuation.
    ///
    /// # Arguments
    /// * `request` - Declared outputs and results plus the step being finished.
    /// * `run_env` - Run state; the action's return values are read from its slot.
    /// * `services` - Sink for the output and completion events.
    ///
    /// # Returns
    /// The executable's return values, which are also left in the run
    /// environment's return-value slot. When binding fails the stack, the
    /// execution path and the action's return values are left as they were.
    pub fn finish_executable(
        &self,
        request: &FinishRequest<'_>,
        run_env: &mut RunEnvironment,
        services: &mut ExecutionRuntimeServices,
    ) -> RuntimeResult<ReturnValues> {
        let mut parent_path = run_env.execution_path().clone();
        parent_path.up()?;
        let step_type = StepType::from(request.executable_type);

        let payload = event_payload(&parent_path, request.step_name, step_type, "Output binding started")
            .with(keys::EXECUTABLE_OUTPUTS, json!(request.outputs))
            .with(keys::EXECUTABLE_RESULTS, json!(request.results));
        services.emit(EventType::OutputStart, payload);

        let (outputs, result) = {
            let variables = run_env.top_variables().ok_or(StackError::EmptyStack)?;
            let action = run_env.return_values();
            let action_outputs = action.map(|returned| &returned.outputs);
            let accessor = ReadOnlyContextAccessor::new(variables, action_outputs);
            let outputs = bind_outputs(&accessor, run_env.system_properties(), request.outputs)?;

            let empty = IndexMap::new();
            let result = resolve_result(
                variables,
                action_outputs.unwrap_or(&empty),
                run_env.system_properties(),
                request.results,
                action.and_then(|returned| returned.result.as_deref()),
            )?;
            (outputs, result)
        };

        run_env.pop_context()?;
        *run_env.execution_path_mut() = parent_path;
        run_env.take_return_values();
        let return_values = ReturnValues::new(outputs, result);
        run_env.put_return_values(return_values.clone());

        for (event_type, description) in [
            (EventType::OutputEnd, "Output binding finished"),
            (EventType::ExecutionFinished, "Execution finished"),
        ] {
            let payload = event_payload(run_env.execution_path(), request.step_name, step_type, description)
                .with_values(keys::OUTPUTS, &return_values.outputs)
                .with(keys::RESULT, json!(return_values.result));
            services.emit(event_type, payload);
        }

        match run_env.pop_parent_flow_data() {
            Some(parent) => {
                debug!(parent = %parent.parent_id, position = parent.resume_position, "resuming parent flow");
                run_env.set_next_step_position(Some(parent.resume_position));
            }
            None => run_env.set_next_step_position(None),
        }
        run_env.execution_path_mut().forward();
        debug!(step = request.step_name, result = ?return_values.result, "executable finished");
        Ok(return_values)
    }
}

fn event_payload(path: &ExecutionPath, step_name: &str, step_type: StepType, description: &str) -> EventPayload {
    EventPayload::new(step_name, step_type, path.current_path(), description)
}
