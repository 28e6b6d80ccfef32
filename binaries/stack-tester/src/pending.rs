//! Deferred results; `struct Pending`.

//---------------------------------------------------------------------------------------------------- Import
use std::future::Future;

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};

use crate::error::MachineError;

//---------------------------------------------------------------------------------------------------- Pending
/// The outcome a [`Pending`] eventually resolves to.
pub type PendingResult<T> = Result<T, MachineError>;

/// An eventually-resolved value with a success or failure outcome.
///
/// This is the machine's single abstraction for asynchronous results: every
/// stack slot holds one. The wrapped computation is memoised: cloning a
/// `Pending` (as `DUP` does) shares it, and every holder observes the one
/// materialised value.
///
/// The computation is *in flight* from the moment the `Pending` is built:
/// [`Pending::new`] spawns it as a task. Only the materialisation is
/// deferred, which is what lets a program issue a commit and observe its
/// effect from a later transaction without ever resolving the commit slot.
#[derive(Clone)]
pub struct Pending<T: Clone> {
    inner: Shared<BoxFuture<'static, PendingResult<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Pending<T> {
    /// Spawn a computation and wrap its eventual result.
    ///
    /// Must be called from within a runtime.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = PendingResult<T>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        Self {
            inner: async move {
                handle
                    .await
                    .expect("a pending operation must not panic or be aborted")
            }
            .boxed()
            .shared(),
        }
    }

    /// An already-resolved value. Needs no runtime and spawns nothing.
    pub fn ready(value: T) -> Self {
        Self::resolved(Ok(value))
    }

    /// An already-failed computation. Needs no runtime and spawns nothing.
    pub fn failed(error: MachineError) -> Self {
        Self::resolved(Err(error))
    }

    fn resolved(result: PendingResult<T>) -> Self {
        Self {
            inner: std::future::ready(result).boxed().shared(),
        }
    }

    /// Drive the computation to completion (or observe its memoised result).
    pub async fn resolve(&self) -> PendingResult<T> {
        self.inner.clone().await
    }
}

impl<T: Clone> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("resolved", &self.inner.peek().is_some())
            .finish()
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_resolves_immediately() {
        let pending = Pending::ready(7_u64);
        assert_eq!(pending.resolve().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn failure_is_shared_across_clones() {
        let pending: Pending<u64> = Pending::failed(MachineError::PoppedEmptyStack);
        let dup = pending.clone();
        assert_eq!(pending.resolve().await, Err(MachineError::PoppedEmptyStack));
        assert_eq!(dup.resolve().await, Err(MachineError::PoppedEmptyStack));
    }

    #[tokio::test]
    async fn computation_runs_once_for_all_clones() {
        use std::sync::atomic::{AtomicU32, Ordering};
        static RUNS: AtomicU32 = AtomicU32::new(0);

        let pending = Pending::new(async {
            RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(1_u64)
        });
        let dup = pending.clone();

        assert_eq!(pending.resolve().await.unwrap(), 1);
        assert_eq!(dup.resolve().await.unwrap(), 1);
        assert_eq!(pending.resolve().await.unwrap(), 1);
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }
}
