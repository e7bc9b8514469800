//! Shared type definitions for the Stepwise step-execution runtime.
//!
//! The crate holds the data that crosses component boundaries: runtime
//! [`Value`]s with their sensitivity flag, the declarative binding descriptors
//! produced by the workflow compiler, executable and action classifications,
//! and the structured [`LanguageEvent`] records emitted while a step runs.

pub mod bindings;
pub mod events;
pub mod executable;
pub mod value;

pub use bindings::{Argument, ExecutableResult, Input, InputType, Output, Prompt, PromptType, SystemProperty};
pub use events::{EventType, LanguageEvent};
pub use executable::{ActionType, ExecutableType, StepType, WorkerGroupMetadata};
pub use value::{SENSITIVE_VALUE_MASK, Value, ValueType};
