use indexmap::IndexMap;
use stepwise_types::{Argument, SystemProperty, Value};

use crate::error::{RuntimeError, RuntimeResult};
use crate::expression::{Scope, resolve_declared};

/// Bind arguments against `context` without required or type enforcement.
///
/// An argument without a declared value reads the context variable of the
/// same name (private arguments never do). Undefined names bind to null.
///
/// # Arguments
/// * `arguments` - Declarations in binding order.
/// * `context` - Variables visible to the arguments.
/// * `system_properties` - Properties reachable through `get_sp`.
///
/// # Returns
/// The bound values keyed by argument name, in declaration order.
pub fn bind_arguments(
    arguments: &[Argument],
    context: &IndexMap<String, Value>,
    system_properties: &[SystemProperty],
) -> RuntimeResult<IndexMap<String, Value>> {
    let mut bound = IndexMap::with_capacity(arguments.len());

    for argument in arguments {
        let value = match &argument.value {
            None if argument.private_argument => Value::null(),
            None => context.get(&argument.name).cloned().unwrap_or_default(),
            Some(declared) => {
                let scope = Scope::new(system_properties).with_layer(context).with_layer(&bound);
                match resolve_declared(declared, &scope) {
                    Ok(value) => value,
                    Err(error) if error.is_unresolved() => Value::null(),
                    Err(error) => return Err(RuntimeError::binding(&argument.name, error)),
                }
            }
        };
        bound.insert(argument.name.clone(), value);
    }

    Ok(bound)
}
