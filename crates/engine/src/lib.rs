//! # Stepwise Engine
//!
//! The Stepwise Engine executes single steps of a workflow graph and manages
//! the call/return protocol around nested executables (flows, operations and
//! decisions).
//!
//! ## Key Features
//!
//! - **Binding**: inputs, arguments, outputs and results are bound from
//!   declarations, with `${ ... }` expressions evaluated against the run's
//!   variables and system properties
//! - **Dispatch**: actions run on a native routine registry, a script
//!   interpreter or a delegated sequential service behind one call contract
//! - **Lifecycle**: start/finish phases push and pop contexts on the
//!   execution stack and resolve the continuation into an enclosing flow
//! - **Parallel loops**: a step fans out into throttled branches, each with
//!   its own run environment, and joins their results back into the flow
//! - **Events**: every phase emits an ordered, masked [`LanguageEvent`]
//!
//! ## Usage
//!
//! ```rust
//! use indexmap::indexmap;
//! use stepwise_engine::{
//!     ActionDispatcher, ExecutableController, ExecutableRunner, ExecutionRuntimeServices, RunOutcome,
//!     SessionObjects, parse_executable,
//! };
//! use stepwise_types::Value;
//! use stepwise_util::RuntimeSettings;
//!
//! let document = parse_executable(r#"
//! name: add
//! inputs:
//!   - name: a
//!   - name: b
//! action:
//!   type: SCRIPTED
//!   script: "total = a + b"
//! outputs:
//!   - name: total
//! "#)?;
//!
//! let runner = ExecutableRunner::new(ActionDispatcher::new(&RuntimeSettings::default()), ExecutableController::new());
//! let mut services = ExecutionRuntimeServices::new();
//! let arguments = indexmap! { "a".to_string() => Value::new(2), "b".to_string() => Value::new(3) };
//! let outcome = runner.run(&document, arguments, &mut services, &mut SessionObjects::new())?;
//!
//! let RunOutcome::Finished(returned) = outcome else { panic!("unexpected pause") };
//! assert_eq!(returned.outputs["total"], Value::new(5));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`expression`**: lexer, parser and evaluator for binding expressions
//! - **`bindings`**: input, argument, output and result binding
//! - **`env`**: execution stack and per-run environment
//! - **`dispatch`**: action dispatcher and its backends
//! - **`lifecycle`**: executable start/finish controller
//! - **`parallel`**: parallel loop split and join bookkeeping
//! - **`events`**: event payloads and the runtime event sink
//! - **`script`**: script interpreter contract and the built-in interpreter
//!
//! [`LanguageEvent`]: stepwise_types::LanguageEvent

pub mod bindings;
pub mod dispatch;
pub mod document;
pub mod env;
pub mod error;
pub mod events;
pub mod expression;
pub mod lifecycle;
pub mod parallel;
pub mod pool;
pub mod runner;
pub mod script;

// Re-export commonly used types for convenience
pub use bindings::PromptSettings;
pub use dispatch::dependency::{DependencyResolver, NoDependencies, ResolvedDependencies, StaticDependencyResolver};
pub use dispatch::native::{NativeCall, Parameter, ReturnShape, Routine, RoutineMethod, RoutineRegistry};
pub use dispatch::sequential::{SequentialExecutionService, SequentialParameters, SequentialStep, UnsupportedSequentialExecution};
pub use dispatch::session::{GLOBAL_SESSION_OBJECT, SessionObjects, SessionResource};
pub use dispatch::{ActionDescriptor, ActionDispatcher};
pub use document::{ExecutableDocument, parse_executable, parse_executable_file};
pub use env::{Context, ContextStack, ExecutionPath, ParentFlowData, ReturnValues, RunEnvironment};
pub use error::{RuntimeError, RuntimeResult, StackError};
pub use events::{EventPayload, ExecutionRuntimeServices};
pub use lifecycle::{BreakpointHandler, ExecutableController, FinishRequest, NoBreakpoints, StartOutcome, StartRequest};
pub use parallel::{
    AddBranchesRequest, Branch, FinishedBranch, JoinBranchesRequest, JoinOutcome, LoopStatement, ParallelLoop, ParallelLoopController,
    ParallelLoopState, ResultNavigation,
};
pub use pool::{SlotPermit, SlotPool};
pub use runner::{ExecutableRunner, RunOutcome};
pub use script::{LineScriptInterpreter, ScriptBinding, ScriptError, ScriptInterpreter};
