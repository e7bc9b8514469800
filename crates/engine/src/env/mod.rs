//! Mutable per-run state.
//!
//! A [`RunEnvironment`] is created once per workflow run and mutated by one
//! logical thread at a time; methods take `&mut self`, so exclusive access is
//! enforced by the borrow checker rather than by locking.
//!
//! The call-argument and return-value slots hold at most one value. The
//! `remove_*` methods consume the slot and fail with
//! [`StackError::EmptySlot`] when nothing was put since the last consume; the
//! `take_*` methods are the optional form for call sites where an empty slot
//! is legitimate.

mod context;
mod execution_path;

pub use context::{Context, ContextStack};
pub use execution_path::ExecutionPath;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use stepwise_types::{Argument, SystemProperty, Value, WorkerGroupMetadata};
use tracing::debug;

use crate::bindings::PromptSettings;
use crate::error::StackError;
use crate::parallel::ParallelLoopState;

const CALL_ARGUMENTS_SLOT: &str = "call arguments";
const RETURN_VALUES_SLOT: &str = "return values";

/// Outputs and selected result of a finished executable or action.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReturnValues {
    pub outputs: IndexMap<String, Value>,
    /// `None` means no result applied, which is distinct from any named result.
    pub result: Option<String>,
}

impl ReturnValues {
    pub fn new(outputs: IndexMap<String, Value>, result: Option<String>) -> Self {
        Self { outputs, result }
    }
}

/// Bookkeeping for resuming an enclosing flow once a nested executable finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentFlowData {
    pub parent_id: String,
    pub resume_position: u64,
    pub worker_group: WorkerGroupMetadata,
}

impl ParentFlowData {
    pub fn new(parent_id: impl Into<String>, resume_position: u64, worker_group: WorkerGroupMetadata) -> Self {
        Self {
            parent_id: parent_id.into(),
            resume_position,
            worker_group,
        }
    }
}

/// Aggregate state of one workflow run.
#[derive(Debug, Clone, Default)]
pub struct RunEnvironment {
    stack: ContextStack,
    call_arguments: Option<IndexMap<String, Value>>,
    return_values: Option<ReturnValues>,
    next_step_position: Option<u64>,
    execution_path: ExecutionPath,
    parent_flow_stack: Vec<ParentFlowData>,
    modified_arguments: Vec<Argument>,
    context_modified: bool,
    serializable_data: IndexMap<String, JsonValue>,
    system_properties: Vec<SystemProperty>,
    prompts: PromptSettings,
    parallel_loop: Option<ParallelLoopState>,
    parallelism_level: usize,
}

impl RunEnvironment {
    pub fn new(system_properties: Vec<SystemProperty>) -> Self {
        Self {
            system_properties,
            ..Self::default()
        }
    }

    pub fn system_properties(&self) -> &[SystemProperty] {
        &self.system_properties
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ContextStack {
        &mut self.stack
    }

    pub fn push_context(&mut self, context: Context) {
        self.stack.push(context);
        debug!(depth = self.stack.depth(), "context pushed");
    }

    pub fn pop_context(&mut self) -> Result<Context, StackError> {
        let context = self.stack.pop()?;
        debug!(depth = self.stack.depth(), "context popped");
        Ok(context)
    }

    /// Variables of the innermost context, if any executable is running.
    pub fn top_variables(&self) -> Option<&IndexMap<String, Value>> {
        self.stack.peek().map(Context::variables)
    }

    pub fn put_call_arguments(&mut self, arguments: IndexMap<String, Value>) {
        self.call_arguments = Some(arguments);
    }

    /// Peek at the pending call arguments without consuming them.
    pub fn call_arguments(&self) -> Option<&IndexMap<String, Value>> {
        self.call_arguments.as_ref()
    }

    /// Consume the call arguments; an empty slot is a dispatch bug.
    pub fn remove_call_arguments(&mut self) -> Result<IndexMap<String, Value>, StackError> {
        self.call_arguments.take().ok_or(StackError::EmptySlot {
            slot: CALL_ARGUMENTS_SLOT,
        })
    }

    pub fn take_call_arguments(&mut self) -> Option<IndexMap<String, Value>> {
        self.call_arguments.take()
    }

    pub fn put_return_values(&mut self, return_values: ReturnValues) {
        self.return_values = Some(return_values);
    }

    pub fn return_values(&self) -> Option<&ReturnValues> {
        self.return_values.as_ref()
    }

    /// Consume the return values; an empty slot is a scheduling bug.
    pub fn remove_return_values(&mut self) -> Result<ReturnValues, StackError> {
        self.return_values.take().ok_or(StackError::EmptySlot {
            slot: RETURN_VALUES_SLOT,
        })
    }

    pub fn take_return_values(&mut self) -> Option<ReturnValues> {
        self.return_values.take()
    }

    /// `None` means "no explicit continuation".
    pub fn set_next_step_position(&mut self, position: Option<u64>) {
        self.next_step_position = position;
    }

    pub fn next_step_position(&self) -> Option<u64> {
        self.next_step_position
    }

    pub fn remove_next_step_position(&mut self) -> Option<u64> {
        self.next_step_position.take()
    }

    pub fn execution_path(&self) -> &ExecutionPath {
        &self.execution_path
    }

    pub fn execution_path_mut(&mut self) -> &mut ExecutionPath {
        &mut self.execution_path
    }

    pub fn push_parent_flow_data(&mut self, data: ParentFlowData) {
        self.parent_flow_stack.push(data);
    }

    pub fn pop_parent_flow_data(&mut self) -> Option<ParentFlowData> {
        self.parent_flow_stack.pop()
    }

    pub fn parent_flow_depth(&self) -> usize {
        self.parent_flow_stack.len()
    }

    /// Arguments supplied by a debugger to rebind the next started executable.
    pub fn set_modified_arguments(&mut self, arguments: Vec<Argument>) {
        self.modified_arguments = arguments;
    }

    pub fn modified_arguments(&self) -> &[Argument] {
        &self.modified_arguments
    }

    pub fn take_modified_arguments(&mut self) -> Vec<Argument> {
        std::mem::take(&mut self.modified_arguments)
    }

    pub fn set_context_modified(&mut self, modified: bool) {
        self.context_modified = modified;
    }

    pub fn is_context_modified(&self) -> bool {
        self.context_modified
    }

    /// Serializable session objects persisted across run boundaries.
    pub fn serializable_data(&self) -> &IndexMap<String, JsonValue> {
        &self.serializable_data
    }

    pub fn serializable_data_mut(&mut self) -> &mut IndexMap<String, JsonValue> {
        &mut self.serializable_data
    }

    /// Prompt answers and settings used when inputs are bound.
    pub fn prompts(&self) -> &PromptSettings {
        &self.prompts
    }

    pub fn prompts_mut(&mut self) -> &mut PromptSettings {
        &mut self.prompts
    }

    /// Split and join bookkeeping of the parallel loop in progress.
    pub fn parallel_loop(&self) -> Option<&ParallelLoopState> {
        self.parallel_loop.as_ref()
    }

    pub fn parallel_loop_mut(&mut self) -> Option<&mut ParallelLoopState> {
        self.parallel_loop.as_mut()
    }

    pub fn set_parallel_loop(&mut self, state: ParallelLoopState) {
        self.parallel_loop = Some(state);
    }

    pub fn take_parallel_loop(&mut self) -> Option<ParallelLoopState> {
        self.parallel_loop.take()
    }

    /// Number of parallel loops currently fanned out around this run.
    pub fn parallelism_level(&self) -> usize {
        self.parallelism_level
    }

    pub(crate) fn enter_parallel_loop(&mut self) {
        self.parallelism_level += 1;
    }

    pub(crate) fn leave_parallel_loop(&mut self) {
        self.parallelism_level = self.parallelism_level.saturating_sub(1);
    }

    /// Copy for one parallel branch: shares the path, properties, prompts and
    /// session data but starts with empty stacks and slots.
    pub fn branch(&self) -> RunEnvironment {
        RunEnvironment {
            stack: ContextStack::default(),
            call_arguments: None,
            return_values: None,
            next_step_position: None,
            execution_path: self.execution_path.clone(),
            parent_flow_stack: Vec::new(),
            modified_arguments: Vec::new(),
            context_modified: false,
            serializable_data: self.serializable_data.clone(),
            system_properties: self.system_properties.clone(),
            prompts: self.prompts.clone(),
            parallel_loop: None,
            parallelism_level: self.parallelism_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    #[test]
    fn second_consume_of_call_arguments_fails() {
        let mut run_env = RunEnvironment::default();
        run_env.put_call_arguments(indexmap! { "host".to_string() => Value::new("localhost") });

        let first = run_env.remove_call_arguments().expect("first consume");
        assert_eq!(first["host"], Value::new("localhost"));
        assert_eq!(
            run_env.remove_call_arguments(),
            Err(StackError::EmptySlot {
                slot: CALL_ARGUMENTS_SLOT
            })
        );
        assert!(run_env.take_call_arguments().is_none());
    }

    #[test]
    fn return_values_are_consumed_once() {
        let mut run_env = RunEnvironment::default();
        run_env.put_return_values(ReturnValues::new(IndexMap::new(), Some("SUCCESS".into())));

        assert_eq!(run_env.remove_return_values().expect("consume").result.as_deref(), Some("SUCCESS"));
        assert!(run_env.remove_return_values().is_err());
    }

    #[test]
    fn parent_flow_stack_is_lifo() {
        let mut run_env = RunEnvironment::default();
        run_env.push_parent_flow_data(ParentFlowData::new("outer", 3, WorkerGroupMetadata::default()));
        run_env.push_parent_flow_data(ParentFlowData::new("inner", 7, WorkerGroupMetadata::default()));

        assert_eq!(run_env.pop_parent_flow_data().map(|data| data.resume_position), Some(7));
        assert_eq!(run_env.parent_flow_depth(), 1);
        assert_eq!(run_env.pop_parent_flow_data().map(|data| data.parent_id), Some("outer".to_string()));
        assert!(run_env.pop_parent_flow_data().is_none());
    }

    #[test]
    fn branches_start_with_empty_stacks() {
        let mut run_env = RunEnvironment::new(vec![SystemProperty::new("net", "host", "a")]);
        run_env.push_context(Context::new(indexmap! { "x".to_string() => Value::new(1) }));
        run_env.push_parent_flow_data(ParentFlowData::new("outer", 3, WorkerGroupMetadata::default()));
        run_env.put_call_arguments(IndexMap::new());
        run_env.execution_path_mut().down();
        run_env.serializable_data_mut().insert("cache".into(), serde_json::json!(1));

        let branch = run_env.branch();

        assert!(branch.stack().is_empty());
        assert_eq!(branch.parent_flow_depth(), 0);
        assert!(branch.call_arguments().is_none());
        assert_eq!(branch.execution_path(), run_env.execution_path());
        assert_eq!(branch.system_properties(), run_env.system_properties());
        assert_eq!(branch.serializable_data().len(), 1);
    }

    #[test]
    fn next_step_position_is_single_slot() {
        let mut run_env = RunEnvironment::default();
        run_env.set_next_step_position(Some(4));
        assert_eq!(run_env.remove_next_step_position(), Some(4));
        assert_eq!(run_env.remove_next_step_position(), None);
    }
}
