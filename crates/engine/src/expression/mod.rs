//! Expression evaluation for declared input, output and result values.
//!
//! A declared value whose content is a string of the form `${ ... }` is an
//! expression; anything else is a literal and passes through unchanged. The
//! expression language is a small Python-flavoured subset (literals, names,
//! arithmetic, comparisons, `and`/`or`/`not`, `in`, indexing and a fixed set
//! of helper functions). Names resolve against a layered [`Scope`] in which
//! later layers shadow earlier ones.
//!
//! Reading an undefined name is reported as
//! [`ExpressionError::UndefinedVariable`]; the binding layer treats that as
//! "no value" rather than a failure.

mod eval;
pub mod lexer;
pub mod parser;

use indexmap::IndexMap;
use stepwise_types::{SystemProperty, Value};
use thiserror::Error;

pub use parser::{Expr, parse};

/// Expression failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("variable '{name}' is not defined")]
    UndefinedVariable { name: String },
    #[error("invalid expression '{expression}': {message}")]
    Syntax { expression: String, message: String },
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("type error: {message}")]
    Type { message: String },
    #[error("value error: {message}")]
    Conversion { message: String },
    #[error("index error: {message}")]
    Index { message: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("overflow: {message}")]
    Overflow { message: String },
}

impl ExpressionError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        ExpressionError::Type { message: message.into() }
    }

    /// Whether the failure only means an operand was unavailable.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, ExpressionError::UndefinedVariable { .. })
    }
}

/// Layered variable lookup used during evaluation.
#[derive(Clone, Default)]
pub struct Scope<'a> {
    layers: Vec<&'a IndexMap<String, Value>>,
    system_properties: &'a [SystemProperty],
}

impl<'a> Scope<'a> {
    pub fn new(system_properties: &'a [SystemProperty]) -> Self {
        Self {
            layers: Vec::new(),
            system_properties,
        }
    }

    /// Add a layer that shadows every layer added before it.
    pub fn with_layer(mut self, layer: &'a IndexMap<String, Value>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(name))
    }

    /// Resolve a system property by `namespace.name`.
    pub fn system_property(&self, fully_qualified_name: &str) -> Option<&'a Value> {
        self.system_properties
            .iter()
            .rev()
            .find(|property| property.fully_qualified_name() == fully_qualified_name)
            .map(|property| &property.value)
    }
}

/// Body of an expression value, or `None` for literals.
pub fn expression_body(value: &Value) -> Option<&str> {
    let text = value.content().as_str()?.trim();
    let inner = text.strip_prefix("${")?.strip_suffix('}')?;
    Some(inner.trim())
}

/// Evaluate expression source text against `scope`.
///
/// The result is sensitive when any variable read during evaluation was.
pub fn evaluate(source: &str, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    let expression = parse(source)?;
    evaluate_parsed(&expression, scope)
}

/// Evaluate an already parsed expression.
pub fn evaluate_parsed(expression: &Expr, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    let mut evaluator = eval::Evaluator::new(scope);
    let content = evaluator.evaluate(expression)?;
    Ok(Value::new(content).with_sensitivity(evaluator.read_sensitive()))
}

/// Resolve a declared value: evaluate expressions, pass literals through.
pub fn resolve_declared(value: &Value, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match expression_body(value) {
        Some(body) => Ok(evaluate(body, scope)?.with_sensitivity(value.is_sensitive())),
        None => Ok(value.clone()),
    }
}

/// Python truthiness of a JSON datum.
pub fn is_truthy(value: &serde_json::Value) -> bool {
    eval::truthy(value)
}

/// Python `str()` rendering of a JSON datum.
pub fn render(value: &serde_json::Value) -> String {
    eval::python_str(value)
}
