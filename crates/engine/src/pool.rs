//! Bounded slot pool shared by concurrent runs.
//!
//! Scripted and sequential dispatch hold a [`SlotPermit`] for the duration of
//! the backend call. Acquisition blocks the calling run's thread when the pool
//! is exhausted; the permit is returned when dropped, on every exit path.

use std::sync::Arc;

use anyhow::anyhow;
use stepwise_util::block_on_future;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// Clonable handle to a counting semaphore sized to the configured capacity.
#[derive(Debug, Clone)]
pub struct SlotPool {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl SlotPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire a slot, blocking until one is free.
    ///
    /// Waiting is not possible from a task of a current-thread Tokio runtime;
    /// an exhausted pool is reported as [`RuntimeError::Pool`] there.
    pub fn acquire(&self) -> RuntimeResult<SlotPermit> {
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(pool = self.name, "pool exhausted; waiting for a slot");
                let semaphore = Arc::clone(&self.semaphore);
                block_on_future(async move { semaphore.acquire_owned().await.map_err(|error| anyhow!(error)) }).map_err(
                    |error| RuntimeError::Pool {
                        message: format!("{}: {error}", self.name),
                    },
                )?
            }
        };
        debug!(pool = self.name, available = self.available(), "slot acquired");
        Ok(SlotPermit {
            pool: self.name,
            _permit: permit,
        })
    }

    /// Stop handing out slots; blocked and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Scoped slot; released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    pool: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        debug!(pool = self.pool, "slot released");
    }
}
