//! Blocking bridge into Tokio.
//!
//! Step execution is synchronous per run, while shared backend resources (the
//! interpreter slot pool) are Tokio primitives. [`block_on_future`] lets the
//! synchronous dispatcher wait on them.

use anyhow::anyhow;
use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;

/// Drive `future` to completion from synchronous code.
///
/// Inside a multi-threaded Tokio runtime the current handle is reused through
/// `block_in_place`; outside any runtime a throwaway current-thread runtime is
/// built. A current-thread runtime cannot be blocked from one of its own
/// tasks, so that case is an error.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) => {
            task::block_in_place(|| handle.block_on(future))
        }
        Ok(handle) => Err(anyhow!(
            "cannot block on a future inside a {:?} Tokio runtime",
            handle.runtime_flavor()
        )),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| anyhow!("failed to build blocking runtime: {error}"))?
            .block_on(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_outside_a_runtime() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>(21 * 2) }).expect("future result");
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reuses_the_current_multi_thread_runtime() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>("done") }).expect("future result");
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn refuses_to_block_a_current_thread_runtime() {
        let error = block_on_future(async { Ok::<_, anyhow::Error>(1) }).expect_err("current-thread runtime");
        assert!(error.to_string().contains("cannot block"));
    }

    #[test]
    fn propagates_future_errors() {
        let error = block_on_future(async { Err::<(), _>(anyhow!("slot pool closed")) }).expect_err("error expected");
        assert!(error.to_string().contains("slot pool closed"));
    }
}
