//! Structured lifecycle events.
//!
//! Every binding and execution phase emits one [`LanguageEvent`]. Payload keys
//! are stable string constants (see [`keys`]) that downstream tracing and
//! debugging tools depend on.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Event-type tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "EVENT_ACTION_START")]
    ActionStart,
    #[serde(rename = "EVENT_ACTION_END")]
    ActionEnd,
    #[serde(rename = "EVENT_ACTION_ERROR")]
    ActionError,
    #[serde(rename = "EVENT_INPUT_START")]
    InputStart,
    #[serde(rename = "EVENT_INPUT_END")]
    InputEnd,
    #[serde(rename = "EVENT_ARGUMENT_END")]
    ArgumentEnd,
    #[serde(rename = "EVENT_OUTPUT_START")]
    OutputStart,
    #[serde(rename = "EVENT_OUTPUT_END")]
    OutputEnd,
    #[serde(rename = "EVENT_EXECUTION_FINISHED")]
    ExecutionFinished,
    #[serde(rename = "EVENT_SPLIT_BRANCHES")]
    SplitBranches,
    #[serde(rename = "EVENT_BRANCH_START")]
    BranchStart,
    #[serde(rename = "EVENT_BRANCH_END")]
    BranchEnd,
    #[serde(rename = "EVENT_JOIN_BRANCHES_START")]
    JoinBranchesStart,
    #[serde(rename = "EVENT_JOIN_BRANCHES_END")]
    JoinBranchesEnd,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ActionStart => "EVENT_ACTION_START",
            EventType::ActionEnd => "EVENT_ACTION_END",
            EventType::ActionError => "EVENT_ACTION_ERROR",
            EventType::InputStart => "EVENT_INPUT_START",
            EventType::InputEnd => "EVENT_INPUT_END",
            EventType::ArgumentEnd => "EVENT_ARGUMENT_END",
            EventType::OutputStart => "EVENT_OUTPUT_START",
            EventType::OutputEnd => "EVENT_OUTPUT_END",
            EventType::ExecutionFinished => "EVENT_EXECUTION_FINISHED",
            EventType::SplitBranches => "EVENT_SPLIT_BRANCHES",
            EventType::BranchStart => "EVENT_BRANCH_START",
            EventType::BranchEnd => "EVENT_BRANCH_END",
            EventType::JoinBranchesStart => "EVENT_JOIN_BRANCHES_START",
            EventType::JoinBranchesEnd => "EVENT_JOIN_BRANCHES_END",
        }
    }
}

/// Stable payload keys.
pub mod keys {
    pub const STEP_NAME: &str = "stepName";
    pub const STEP_TYPE: &str = "stepType";
    pub const BOUND_INPUTS: &str = "boundInputs";
    pub const OUTPUTS: &str = "outputs";
    pub const BOUND_ARGUMENTS: &str = "boundArguments";
    pub const RESULT: &str = "result";
    pub const CALL_ARGUMENTS: &str = "callArguments";
    pub const INPUTS: &str = "inputs";
    pub const EXECUTABLE_OUTPUTS: &str = "executableOutputs";
    pub const EXECUTABLE_RESULTS: &str = "executableResults";
    pub const EXCEPTION: &str = "exception";
    pub const PATH: &str = "path";
    pub const DESCRIPTION: &str = "description";
    pub const NEXT_STEP_POSITION: &str = "nextStepPosition";
    pub const BOUND_PARALLEL_LOOP_EXPRESSION: &str = "boundParallelLoopExpression";
    pub const SPLIT_ITEM: &str = "splitItem";
    pub const REF_ID: &str = "refId";
    pub const BRANCH_RETURN_VALUES: &str = "branchReturnValues";
    pub const STEP_PUBLISH: &str = "stepPublishValues";
    pub const STEP_NAVIGATION: &str = "stepNavigationValues";
}

/// One immutable lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguageEvent {
    /// Phase tag.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Monotonic ordering token within one run.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Ordered payload; sensitive values are already masked.
    pub data: IndexMap<String, JsonValue>,
}

impl LanguageEvent {
    /// Payload entry for `key`.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// Convenience accessor for the `stepName` entry.
    pub fn step_name(&self) -> Option<&str> {
        self.data.get(keys::STEP_NAME).and_then(JsonValue::as_str)
    }
}
