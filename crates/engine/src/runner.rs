//! Single-executable runner: start, dispatch the action, finish.

use indexmap::IndexMap;
use stepwise_types::Value;
use tracing::debug;

use crate::dispatch::ActionDispatcher;
use crate::dispatch::session::SessionObjects;
use crate::document::ExecutableDocument;
use crate::env::{ReturnValues, RunEnvironment};
use crate::error::RuntimeResult;
use crate::events::ExecutionRuntimeServices;
use crate::lifecycle::{ExecutableController, FinishRequest, StartOutcome, StartRequest};

// Positions of the compiled action and finish steps; start is position 0.
const ACTION_POSITION: u64 = 1;
const FINISH_POSITION: u64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(ReturnValues),
    /// A breakpoint stopped the run before its inputs were bound.
    Paused,
}

/// Drives one executable document through start, dispatch and finish in a
/// fresh run environment.
#[derive(Clone)]
pub struct ExecutableRunner {
    dispatcher: ActionDispatcher,
    controller: ExecutableController,
}

impl ExecutableRunner {
    pub fn new(dispatcher: ActionDispatcher, controller: ExecutableController) -> Self {
        Self { dispatcher, controller }
    }

    pub fn run(
        &self,
        document: &ExecutableDocument,
        call_arguments: IndexMap<String, Value>,
        services: &mut ExecutionRuntimeServices,
        sessions: &mut SessionObjects,
    ) -> RuntimeResult<RunOutcome> {
        let mut run_env = RunEnvironment::new(document.system_properties.clone());
        run_env.put_call_arguments(call_arguments);

        let start = StartRequest {
            inputs: &document.inputs,
            step_name: &document.name,
            next_step_position: Some(ACTION_POSITION),
            executable_type: document.executable_type,
        };
        if self.controller.start_executable(&start, &mut run_env, services)? == StartOutcome::Paused {
            return Ok(RunOutcome::Paused);
        }

        let mut action = document.action.clone();
        if action.step_name.is_none() {
            action.step_name = Some(document.name.clone());
        }
        self.dispatcher
            .dispatch(services, &mut run_env, sessions, Some(FINISH_POSITION), &action)?;

        let finish = FinishRequest {
            outputs: &document.outputs,
            results: &document.results,
            step_name: &document.name,
            executable_type: document.executable_type,
        };
        self.controller.finish_executable(&finish, &mut run_env, services)?;

        let return_values = run_env.remove_return_values()?;
        debug!(executable = %document.name, result = ?return_values.result, "executable run complete");
        Ok(RunOutcome::Finished(return_values))
    }
}
