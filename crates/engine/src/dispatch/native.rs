//! In-process routine backend for NATIVE actions.
//!
//! A [`RoutineRegistry`] stands in for loading routine classes at run time:
//! routines are registered up front with their methods, and each method
//! declares the parameters it binds. The handler receives a [`NativeCall`]
//! holding the bound parameter values and returns its outputs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as JsonValue};
use stepwise_types::{InputType, Value};
use tracing::debug;

use super::session::{GLOBAL_SESSION_OBJECT, SessionObjects, SessionResource};
use crate::error::{RuntimeError, RuntimeResult};

/// A parameter declared by a routine method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// Bound from the call argument of the same name; absent means null.
    Input { name: String, input_type: InputType },
    /// Bound to the process-local session object under `key`.
    GlobalSession { key: String },
    /// Bound to the run's serializable session map under `key`.
    SerializableSession { key: String },
}

impl Parameter {
    pub fn input(name: impl Into<String>) -> Self {
        Parameter::Input {
            name: name.into(),
            input_type: InputType::Any,
        }
    }

    pub fn typed_input(name: impl Into<String>, input_type: InputType) -> Self {
        Parameter::Input {
            name: name.into(),
            input_type,
        }
    }

    pub fn global_session(key: impl Into<String>) -> Self {
        Parameter::GlobalSession { key: key.into() }
    }

    pub fn serializable_session(key: impl Into<String>) -> Self {
        Parameter::SerializableSession { key: key.into() }
    }
}

/// Declared return shape of a routine method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReturnShape {
    /// A map of output names to values; the only shape actions may return.
    #[default]
    Map,
    Other(String),
}

pub type RoutineHandler = Arc<dyn Fn(&mut NativeCall) -> anyhow::Result<IndexMap<String, Value>> + Send + Sync>;

/// Bound parameters handed to a routine handler.
#[derive(Debug, Default)]
pub struct NativeCall {
    inputs: IndexMap<String, Value>,
    sessions: IndexMap<String, SessionResource>,
    serializable: IndexMap<String, JsonMap<String, JsonValue>>,
}

impl NativeCall {
    /// Value bound to an `Input` parameter.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// String content of an `Input` parameter, if it is a string.
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(|value| value.content().as_str())
    }

    pub fn session(&self, key: &str) -> Option<&SessionResource> {
        self.sessions.get(key)
    }

    pub fn serializable_session(&self, key: &str) -> Option<&JsonMap<String, JsonValue>> {
        self.serializable.get(key)
    }

    /// Mutable session map; changes are written back to the run after the call.
    pub fn serializable_session_mut(&mut self, key: &str) -> Option<&mut JsonMap<String, JsonValue>> {
        self.serializable.get_mut(key)
    }
}

/// One callable method of a routine.
#[derive(Clone)]
pub struct RoutineMethod {
    parameters: Vec<Parameter>,
    action: bool,
    return_shape: ReturnShape,
    handler: RoutineHandler,
}

impl RoutineMethod {
    /// A method marked as an action, returning a map.
    pub fn action<F>(handler: F) -> Self
    where
        F: Fn(&mut NativeCall) -> anyhow::Result<IndexMap<String, Value>> + Send + Sync + 'static,
    {
        Self {
            parameters: Vec::new(),
            action: true,
            return_shape: ReturnShape::Map,
            handler: Arc::new(handler),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Drop the action marker; dispatching the method then fails.
    pub fn unmarked(mut self) -> Self {
        self.action = false;
        self
    }

    pub fn returning(mut self, shape: ReturnShape) -> Self {
        self.return_shape = shape;
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_action(&self) -> bool {
        self.action
    }
}

impl fmt::Debug for RoutineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutineMethod")
            .field("parameters", &self.parameters)
            .field("action", &self.action)
            .field("return_shape", &self.return_shape)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Routine {
    methods: HashMap<String, RoutineMethod>,
}

impl Routine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, name: impl Into<String>, method: RoutineMethod) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn method(&self, name: &str) -> Option<&RoutineMethod> {
        self.methods.get(name)
    }
}

/// Routines available to NATIVE actions, keyed by routine id.
#[derive(Debug, Clone, Default)]
pub struct RoutineRegistry {
    routines: HashMap<String, Routine>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, routine_id: impl Into<String>, routine: Routine) {
        self.routines.insert(routine_id.into(), routine);
    }

    pub fn with_routine(mut self, routine_id: impl Into<String>, routine: Routine) -> Self {
        self.register(routine_id, routine);
        self
    }

    pub fn routine(&self, routine_id: &str) -> Option<&Routine> {
        self.routines.get(routine_id)
    }

    /// Look up an action method, validating its marker and return shape.
    pub fn resolve(&self, routine_id: &str, method_name: &str) -> RuntimeResult<&RoutineMethod> {
        let routine = self.routine(routine_id).ok_or_else(|| RuntimeError::RoutineNotFound {
            routine_id: routine_id.to_string(),
        })?;
        let method = routine.method(method_name).ok_or_else(|| RuntimeError::MethodNotFound {
            routine_id: routine_id.to_string(),
            method_name: method_name.to_string(),
        })?;
        if !method.action {
            return Err(RuntimeError::MissingAnnotation {
                routine_id: routine_id.to_string(),
                method_name: method_name.to_string(),
            });
        }
        if method.return_shape != ReturnShape::Map {
            return Err(RuntimeError::InvalidReturnType {
                routine_id: routine_id.to_string(),
                method_name: method_name.to_string(),
            });
        }
        Ok(method)
    }
}

/// Invoke `routine_id.method_name` with parameters bound from the call
/// arguments and both session stores.
///
/// A panicking handler is reported as [`RuntimeError::RoutineFailed`] and its
/// serializable session changes are discarded.
pub fn execute_native(
    registry: &RoutineRegistry,
    routine_id: &str,
    method_name: &str,
    call_arguments: &IndexMap<String, Value>,
    sessions: &mut SessionObjects,
    serializable_data: &mut IndexMap<String, JsonValue>,
) -> RuntimeResult<IndexMap<String, Value>> {
    let method = registry.resolve(routine_id, method_name)?;

    let mut call = NativeCall::default();
    for parameter in &method.parameters {
        match parameter {
            Parameter::Input { name, input_type } => {
                let value = call_arguments.get(name).cloned().unwrap_or_else(Value::null);
                if !input_type.accepts(&value) {
                    return Err(RuntimeError::type_mismatch(
                        name,
                        input_type.as_str(),
                        value.value_type().as_str(),
                    ));
                }
                call.inputs.insert(name.clone(), value);
            }
            Parameter::GlobalSession { key } => {
                let resource = sessions.resource(GLOBAL_SESSION_OBJECT, key);
                call.sessions.insert(key.clone(), resource);
            }
            Parameter::SerializableSession { key } => {
                let entry = serializable_data
                    .entry(key.clone())
                    .or_insert_with(|| JsonValue::Object(JsonMap::new()));
                let map = match entry {
                    JsonValue::Object(map) => map.clone(),
                    _ => JsonMap::new(),
                };
                call.serializable.insert(key.clone(), map);
            }
        }
    }

    debug!(routine = routine_id, method = method_name, parameters = method.parameters.len(), "invoking native routine");
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (method.handler)(&mut call))) {
        Ok(outcome) => {
            for (key, map) in call.serializable {
                serializable_data.insert(key, JsonValue::Object(map));
            }
            outcome
        }
        Err(payload) => Err(anyhow!("routine panicked: {}", panic_message(payload.as_ref()))),
    };

    outcome.map_err(|source| RuntimeError::RoutineFailed {
        routine_id: routine_id.to_string(),
        method_name: method_name.to_string(),
        source,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message;
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message;
    }
    "unknown panic"
}
