//! Executable, action and step classifications.

use serde::{Deserialize, Serialize};

/// Kind of nestable executable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableType {
    Flow,
    Operation,
    Decision,
}

/// Backend an action is dispatched to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Routine resolved from the native registry.
    Native,
    /// Source text evaluated by the script interpreter.
    Scripted,
    /// Sub-flow delegated to the sequential execution service.
    Sequential,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Native => "NATIVE",
            ActionType::Scripted => "SCRIPTED",
            ActionType::Sequential => "SEQUENTIAL",
        }
    }
}

/// Value of the `stepType` event key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Flow,
    Operation,
    Decision,
    Action,
    /// A step of a flow, used by parallel-loop bookkeeping.
    Step,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Flow => "FLOW",
            StepType::Operation => "OPERATION",
            StepType::Decision => "DECISION",
            StepType::Action => "ACTION",
            StepType::Step => "STEP",
        }
    }
}

impl From<ExecutableType> for StepType {
    fn from(executable_type: ExecutableType) -> Self {
        match executable_type {
            ExecutableType::Flow => StepType::Flow,
            ExecutableType::Operation => StepType::Operation,
            ExecutableType::Decision => StepType::Decision,
        }
    }
}

/// Worker-group routing carried with parent-flow bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerGroupMetadata {
    /// Worker group the parent flow runs on; `None` means the default group.
    #[serde(default)]
    pub group: Option<String>,
    /// Skip group routing when resuming the parent.
    #[serde(default)]
    pub ignore_group_routing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_follows_executable_type() {
        assert_eq!(StepType::from(ExecutableType::Operation).as_str(), "OPERATION");
        assert_eq!(serde_json::to_string(&StepType::Action).expect("serialize"), "\"ACTION\"");
        let parsed: ActionType = serde_json::from_str("\"SCRIPTED\"").expect("parse");
        assert_eq!(parsed, ActionType::Scripted);
    }
}
