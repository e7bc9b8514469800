//! Non-serializable session objects.
//!
//! Objects live only inside the current process and are grouped by a
//! well-known group name (routines share state through
//! [`GLOBAL_SESSION_OBJECT`]). The store is passed explicitly to the
//! dispatcher; runs only share objects when handed the same store.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Group for objects shared by every native routine in a run.
pub const GLOBAL_SESSION_OBJECT: &str = "GLOBAL_SESSION_OBJECT";

/// Shared, initially empty cell holding one session object.
#[derive(Clone, Default)]
pub struct SessionResource(Arc<Mutex<Option<Box<dyn Any + Send>>>>);

impl SessionResource {
    /// Clone the stored object when it has type `T`.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().and_then(|object| object.downcast_ref::<T>()).cloned()
    }

    /// Replace the stored object.
    pub fn set<T: Any + Send>(&self, object: T) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Box::new(object));
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Whether both handles point at the same cell.
    pub fn same_as(&self, other: &SessionResource) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SessionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResource").field("empty", &self.is_empty()).finish()
    }
}

/// Grouped store of session resources.
#[derive(Debug, Clone, Default)]
pub struct SessionObjects {
    groups: HashMap<String, HashMap<String, SessionResource>>,
}

impl SessionObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource for `key` in `group`, created empty when absent.
    pub fn resource(&mut self, group: &str, key: &str) -> SessionResource {
        self.groups
            .entry(group.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&SessionResource> {
        self.groups.get(group).and_then(|resources| resources.get(key))
    }

    pub fn put(&mut self, group: &str, key: &str, resource: SessionResource) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), resource);
    }
}
