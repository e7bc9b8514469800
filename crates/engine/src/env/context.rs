//! Variable scopes and the LIFO execution stack.

use indexmap::IndexMap;
use stepwise_types::Value;

use crate::error::StackError;

/// Variable scope of one executable invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    variables: IndexMap<String, Value>,
    /// Language-scoped values (loop state, interpreter handles) never published as outputs.
    language_variables: IndexMap<String, Value>,
}

impl Context {
    pub fn new(variables: IndexMap<String, Value>) -> Self {
        Self {
            variables,
            language_variables: IndexMap::new(),
        }
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Insert or replace a variable; replacement keeps the original position.
    pub fn put_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn language_variables(&self) -> &IndexMap<String, Value> {
        &self.language_variables
    }

    pub fn put_language_variable(&mut self, name: impl Into<String>, value: Value) {
        self.language_variables.insert(name.into(), value);
    }
}

/// Stack of contexts; depth equals the current executable nesting depth.
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    contexts: Vec<Context>,
}

impl ContextStack {
    pub fn push(&mut self, context: Context) {
        self.contexts.push(context);
    }

    pub fn pop(&mut self) -> Result<Context, StackError> {
        self.contexts.pop().ok_or(StackError::EmptyStack)
    }

    pub fn peek(&self) -> Option<&Context> {
        self.contexts.last()
    }

    pub fn peek_mut(&mut self) -> Option<&mut Context> {
        self.contexts.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
