//! Declarative binding descriptors.
//!
//! These descriptors are produced by the workflow compiler (or loaded from an
//! executable document) and consumed read-only by the engine's binding
//! algorithms. A declared `value` is either an expression of the form
//! `${ ... }` or a literal.

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

/// Declared runtime type of an executable input.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// Accepts any runtime type.
    #[default]
    Any,
    String,
    Number,
    Boolean,
    List,
    Map,
}

impl InputType {
    /// Whether a bound value satisfies this declared type.
    ///
    /// Null always satisfies the declaration; absence is handled by the
    /// required-input rule rather than by type checking.
    pub fn accepts(self, value: &Value) -> bool {
        let actual = value.value_type();
        match self {
            InputType::Any => true,
            _ if actual == ValueType::Null => true,
            InputType::String => actual == ValueType::String,
            InputType::Number => actual == ValueType::Number,
            InputType::Boolean => actual == ValueType::Boolean,
            InputType::List => actual == ValueType::List,
            InputType::Map => actual == ValueType::Map,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputType::Any => "any",
            InputType::String => "string",
            InputType::Number => "number",
            InputType::Boolean => "boolean",
            InputType::List => "list",
            InputType::Map => "map",
        }
    }
}

/// How an interactive prompt collects its answer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    #[default]
    Text,
    SingleChoice,
    MultiChoice,
}

/// Interactive prompt attached to an input.
///
/// `message` and `options` may be expressions; they are resolved against the
/// binding context before the prompt is handed to the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    #[serde(default, rename = "type")]
    pub prompt_type: PromptType,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub options: Option<Value>,
    /// Separator between choices when `options` is a single string.
    #[serde(default)]
    pub delimiter: Option<String>,
}

impl Prompt {
    pub fn text(message: impl Into<Value>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_options(mut self, prompt_type: PromptType, options: impl Into<Value>) -> Self {
        self.prompt_type = prompt_type;
        self.options = Some(options.into());
        self
    }
}

/// Input declared by an executable (flow or operation).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Input {
    /// Variable name the bound value is published under.
    pub name: String,
    /// Default expression or literal.
    #[serde(default)]
    pub value: Option<Value>,
    /// Missing values fail the binding when set.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Ignore caller-supplied values and always evaluate the declared value.
    #[serde(default, rename = "private")]
    pub private_input: bool,
    /// Mark the bound value sensitive.
    #[serde(default)]
    pub sensitive: bool,
    /// Declared runtime type.
    #[serde(default, rename = "type")]
    pub input_type: InputType,
    /// Ask the user for the value instead of failing when it is missing.
    #[serde(default)]
    pub prompt: Option<Prompt>,
}

impl Input {
    /// Creates a required, public, untyped input without a default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            required: true,
            private_input: false,
            sensitive: false,
            input_type: InputType::Any,
            prompt: None,
        }
    }

    pub fn has_prompt(&self) -> bool {
        self.prompt.is_some()
    }

    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn private(mut self) -> Self {
        self.private_input = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn typed(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }
}

/// Step argument; used when rebinding a paused step's inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Argument {
    pub name: String,
    /// Expression or literal; when absent the variable of the same name is read.
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "private")]
    pub private_argument: bool,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
            private_argument: false,
        }
    }
}

/// Output published by a finished executable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Output {
    pub name: String,
    /// Expression or literal; when absent the variable of the same name is read.
    #[serde(default)]
    pub value: Option<Value>,
}

impl Output {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self { name: name.into(), value }
    }
}

/// Candidate result of an executable, selected by a boolean expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutableResult {
    pub name: String,
    /// Boolean expression or literal; an absent value always matches.
    #[serde(default)]
    pub value: Option<Value>,
}

impl ExecutableResult {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self { name: name.into(), value }
    }
}

/// Run-scoped property addressable from expressions through `get_sp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemProperty {
    pub namespace: String,
    pub name: String,
    pub value: Value,
}

impl SystemProperty {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Lookup key in the form `namespace.name`; an empty namespace yields the bare name.
    pub fn fully_qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

const fn default_true() -> bool {
    true
}
