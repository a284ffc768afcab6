//! Shared tokio runtime for synchronous callers.
//!
//! Blocking execution and engines created outside of an async context run
//! on this runtime. It is created on first use.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{BridgeError, Result};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get the shared runtime, creating it if needed.
pub fn get() -> Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("lattice-transport-io")
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Runtime(format!("failed to create tokio runtime: {e}")))?;

    // Another thread may have won the race; its runtime is kept and ours dropped.
    let _ = RUNTIME.set(runtime);
    RUNTIME
        .get()
        .ok_or_else(|| BridgeError::Runtime("shared runtime unavailable".to_string()))
}

/// A handle to the current runtime if there is one, otherwise to the shared
/// runtime.
pub fn handle() -> Result<Handle> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle),
        Err(_) => Ok(get()?.handle().clone()),
    }
}

/// Block on a future using the shared runtime.
///
/// # Errors
///
/// Fails with [`BridgeError::Runtime`] when called from within an async
/// context, where blocking would stall the calling runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if Handle::try_current().is_ok() {
        return Err(BridgeError::Runtime(
            "cannot block on a call from within an async runtime".to_string(),
        ));
    }
    Ok(get()?.block_on(future))
}

/// Spawn a future on the shared runtime.
pub fn spawn<F>(future: F) -> Result<tokio::task::JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Ok(get()?.spawn(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on() {
        assert_eq!(block_on(async { 1 + 1 }).unwrap(), 2);
    }

    #[test]
    fn test_spawn() {
        let task = spawn(async { "done" }).unwrap();
        assert_eq!(block_on(task).unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_block_on_inside_runtime_fails() {
        assert!(matches!(block_on(async {}), Err(BridgeError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_handle_prefers_current() {
        let task = handle().unwrap().spawn(async { 3 });
        assert_eq!(task.await.unwrap(), 3);
    }
}
