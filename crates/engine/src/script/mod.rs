//! Script interpreter contract.
//!
//! The dispatcher only depends on [`ScriptInterpreter`]: it reports which
//! names a script reads before assigning them, and it evaluates a script
//! seeded with the call arguments, returning every top-level binding. Values
//! the interpreter cannot represent as data are reported as
//! [`ScriptBinding::Unserializable`] so the dispatcher can apply its
//! drop-or-fail rule.
//!
//! [`LineScriptInterpreter`] is the built-in implementation.

mod line;

pub use line::LineScriptInterpreter;

use indexmap::IndexMap;
use stepwise_types::Value;
use thiserror::Error;

use crate::expression::ExpressionError;

/// Final state of one top-level script variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptBinding {
    /// Plain data that can become a step output. Values derived from a
    /// sensitive binding stay sensitive.
    Serializable(Value),
    /// An interpreter object (module, function, handle) with no data form.
    Unserializable {
        type_name: String,
        /// The interpreter expects the caller to read this value.
        exportable: bool,
    },
}

/// Script evaluation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("line {line}: {source}")]
    Expression {
        line: usize,
        #[source]
        source: ExpressionError,
    },
    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },
}

/// Evaluates script source text for SCRIPTED actions.
pub trait ScriptInterpreter: Send + Sync {
    /// Names read before they are assigned; these must be supplied by the caller.
    fn required_bindings(&self, script: &str) -> Result<Vec<String>, ScriptError>;

    /// Evaluate `script` with `arguments` as initial bindings and return every
    /// top-level binding in first-assignment order.
    fn execute(&self, script: &str, arguments: &IndexMap<String, Value>) -> Result<IndexMap<String, ScriptBinding>, ScriptError>;
}
