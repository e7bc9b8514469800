use indexmap::IndexMap;
use stepwise_types::{Output, SystemProperty, Value};

use crate::error::{RuntimeError, RuntimeResult};
use crate::expression::{Scope, resolve_declared};

/// Read-only view of a finishing executable: action outputs shadow its variables.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyContextAccessor<'a> {
    variables: &'a IndexMap<String, Value>,
    action_outputs: Option<&'a IndexMap<String, Value>>,
}

impl<'a> ReadOnlyContextAccessor<'a> {
    pub fn new(variables: &'a IndexMap<String, Value>, action_outputs: Option<&'a IndexMap<String, Value>>) -> Self {
        Self { variables, action_outputs }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.action_outputs
            .and_then(|outputs| outputs.get(name))
            .or_else(|| self.variables.get(name))
    }

    fn scope<'s>(&self, system_properties: &'s [SystemProperty]) -> Scope<'s>
    where
        'a: 's,
    {
        let scope = Scope::new(system_properties).with_layer(self.variables);
        match self.action_outputs {
            Some(outputs) => scope.with_layer(outputs),
            None => scope,
        }
    }
}

/// Bind declared outputs against `accessor`.
///
/// Every declared output appears in the result: unresolved expressions and
/// unknown names yield an explicit null entry. Other evaluation failures are fatal.
///
/// # Arguments
/// * `accessor` - Variables of the finishing executable, shadowed by action outputs.
/// * `system_properties` - Properties reachable through `get_sp`.
/// * `outputs` - Declarations in binding order.
///
/// # Returns
/// One entry per declared output, in declaration order.
pub fn bind_outputs(
    accessor: &ReadOnlyContextAccessor<'_>,
    system_properties: &[SystemProperty],
    outputs: &[Output],
) -> RuntimeResult<IndexMap<String, Value>> {
    let scope = accessor.scope(system_properties);
    let mut bound = IndexMap::with_capacity(outputs.len());

    for output in outputs {
        let value = match &output.value {
            None => accessor.get(&output.name).cloned().unwrap_or_default(),
            Some(declared) => match resolve_declared(declared, &scope) {
                Ok(value) => value,
                Err(error) if error.is_unresolved() => Value::null(),
                Err(error) => return Err(RuntimeError::binding(&output.name, error)),
            },
        };
        bound.insert(output.name.clone(), value);
    }

    Ok(bound)
}
