//! Bounded blocking-task executor (§5).
//!
//! `rusqlite::Connection` is synchronous; every store access is
//! dispatched through here rather than called directly on the loop's
//! async task, so a slow disk or lock wait never stalls worker-output
//! draining. The semaphore caps how many blocking calls run at once,
//! sized to the store's expected concurrent-writer count rather than
//! left unbounded — an unbounded `spawn_blocking` pool would let a
//! burst of store calls starve tokio's blocking thread pool.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{EngineError, EngineResult};

pub struct BlockingExecutor {
    semaphore: Arc<Semaphore>,
}

impl BlockingExecutor {
    pub fn new(capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity.max(1))) }
    }

    /// Run a blocking closure on tokio's blocking pool, gated by the
    /// executor's capacity semaphore. The closure must own everything
    /// it touches (typically a cloned `Arc<Mutex<Store>>` guard taken
    /// inside the closure).
    pub async fn run<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::fatal(format!("executor semaphore closed: {e}")))?;
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await;
        match result {
            Ok(inner) => inner,
            Err(join_err) => Err(EngineError::fatal(format!("blocking task panicked: {join_err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_closures_and_returns_their_result() {
        let exec = BlockingExecutor::new(2);
        let result = exec.run(|| Ok(40 + 2)).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn propagates_closure_errors() {
        let exec = BlockingExecutor::new(1);
        let err = exec.run(|| Err::<(), _>(EngineError::constraint("boom"))).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Constraint);
    }
}
