//! Error taxonomy of the step-execution core.
//!
//! Every variant is fatal to the current step or invocation. Nothing in the
//! core retries; callers inspect the run environment and the emitted events to
//! decide how the workflow graph proceeds.

use stepwise_types::Input;
use thiserror::Error;

use crate::expression::ExpressionError;
use crate::script::ScriptError;

/// Errors raised while binding, dispatching, or finishing a step.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Missing required input(s): {}", names.join(", "))]
    MissingRequiredInput { names: Vec<String> },

    /// Inputs whose value must come from the user; their prompts are resolved.
    #[error("Input(s) awaiting a prompt answer: {}", inputs.iter().map(|input| input.name.as_str()).collect::<Vec<_>>().join(", "))]
    MissingInputsWithPrompt { inputs: Vec<Input> },

    #[error("Type mismatch for '{name}': expected {expected}, got {actual}")]
    TypeMismatch { name: String, expected: String, actual: String },

    #[error("Script is missing")]
    MissingScript,

    #[error("Script is empty")]
    EmptyScript,

    #[error("Routine not found: {routine_id}")]
    RoutineNotFound { routine_id: String },

    #[error("Method '{method_name}' not found on routine '{routine_id}'")]
    MethodNotFound { routine_id: String, method_name: String },

    #[error("Method '{method_name}' on routine '{routine_id}' is not marked as an action")]
    MissingAnnotation { routine_id: String, method_name: String },

    #[error("Method '{method_name}' on routine '{routine_id}' must return a map of names to values")]
    InvalidReturnType { routine_id: String, method_name: String },

    #[error("Routine '{routine_id}.{method_name}' failed: {source}")]
    RoutineFailed {
        routine_id: String,
        method_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cannot serialize variable '{variable}' of type {type_name}")]
    Serialization { variable: String, type_name: String },

    #[error("Script execution failed: {0}")]
    ScriptFailed(#[from] ScriptError),

    #[error("Sequential execution of '{coordinate}' failed: {source}")]
    SequentialFailed {
        coordinate: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Dependency resolution failed for '{coordinate}': {source}")]
    DependencyResolution {
        coordinate: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to bind '{name}': {source}")]
    Binding {
        name: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Result '{name}' must evaluate to a boolean, got {actual}")]
    ResultResolution { name: String, actual: String },

    #[error("Parallel loop of '{step_name}' is invalid: {message}")]
    InvalidParallelLoop { step_name: String, message: String },

    #[error("Parallel loop of '{step_name}' failed in {failed} branch(es)")]
    BranchFailed { step_name: String, failed: usize },

    #[error("Step '{step_name}' has no navigation for result '{result}'")]
    MissingNavigation { step_name: String, result: String },

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("Executor pool unavailable: {message}")]
    Pool { message: String },
}

impl RuntimeError {
    pub fn binding(name: impl Into<String>, source: ExpressionError) -> Self {
        RuntimeError::Binding { name: name.into(), source }
    }

    pub fn type_mismatch(name: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Violations of the run environment's stack and slot discipline.
///
/// These indicate a bug in the embedding scheduler and must not be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StackError {
    #[error("Execution stack is empty")]
    EmptyStack,

    #[error("The {slot} slot is empty")]
    EmptySlot { slot: &'static str },

    #[error("Execution path is already at the top level")]
    EmptyExecutionPath,

    #[error("No parallel loop is in progress")]
    NoParallelLoop,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
