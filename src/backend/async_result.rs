//! Single-assignment result handles for backend calls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::error::{Result, TrackerError};

/// Handle to the outcome of an asynchronous backend call.
///
/// The handle is pending until the call finishes, then holds either the
/// value or the error forever. It can be cloned and awaited from any number
/// of places; every clone observes the same outcome.
///
/// Calls started with [`AsyncResult::spawn`] run on the Tokio runtime, so
/// dropping every handle does not cancel them.
pub struct AsyncResult<T: Clone> {
    inner: Shared<BoxFuture<'static, Result<T>>>,
}

impl<T> AsyncResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start `future` as a background task and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let task = tokio::spawn(future);
        let inner = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(TrackerError::Transport(format!("backend task failed: {}", e))),
            }
        }
        .boxed()
        .shared();
        Self { inner }
    }

    /// A handle that is already settled.
    pub fn ready(result: Result<T>) -> Self {
        Self {
            inner: future::ready(result).boxed().shared(),
        }
    }

    /// A handle already fulfilled with `value`.
    pub fn fulfilled(value: T) -> Self {
        Self::ready(Ok(value))
    }

    /// A handle already rejected with `error`.
    pub fn rejected(error: TrackerError) -> Self {
        Self::ready(Err(error))
    }

    /// The outcome, if the call has settled and the handle was polled.
    pub fn peek(&self) -> Option<&Result<T>> {
        self.inner.peek()
    }

    /// Check whether no outcome has been observed yet.
    pub fn is_pending(&self) -> bool {
        self.peek().is_none()
    }

    /// Attach a continuation that transforms the fulfilled value.
    ///
    /// The continuation runs lazily, on the first await of the new handle.
    pub fn and_then<U, F>(self, f: F) -> AsyncResult<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        AsyncResult {
            inner: async move { self.await.and_then(f) }.boxed().shared(),
        }
    }
}

impl<T: Clone> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Future for AsyncResult<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<T: Clone> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.peek() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_pending_until_settled() {
        let (tx, rx) = oneshot::channel::<u32>();
        let handle = AsyncResult::spawn(async move {
            rx.await
                .map_err(|_| TrackerError::Transport("sender dropped".to_string()))
        });

        let mut observed = tokio_test::task::spawn(handle.clone());
        assert_pending!(observed.poll());
        assert!(handle.is_pending());

        tx.send(7).unwrap();
        assert_eq!(handle.clone().await, Ok(7));
        assert!(!handle.is_pending());
        assert_eq!(assert_ready!(observed.poll()), Ok(7));
    }

    #[tokio::test]
    async fn test_every_clone_sees_same_outcome() {
        let handle: AsyncResult<String> =
            AsyncResult::rejected(TrackerError::NotFound("bug 3".to_string()));

        let (a, b) = tokio::join!(handle.clone(), handle.clone());
        assert_eq!(a, b);
        assert!(matches!(a, Err(TrackerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_spawned_call_runs_without_awaiting() {
        let (tx, rx) = oneshot::channel();
        let handle = AsyncResult::spawn(async move {
            let _ = tx.send(());
            Ok(1u8)
        });
        drop(handle);

        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_and_then_transforms_value() {
        let handle = AsyncResult::fulfilled(20u32).and_then(|v| Ok(v + 1));
        assert_eq!(handle.await, Ok(21));

        let failed = AsyncResult::fulfilled(0u32)
            .and_then(|_| Err::<u32, _>(TrackerError::protocol("bad shape")));
        assert!(matches!(failed.await, Err(TrackerError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_debug_shows_state() {
        let handle = AsyncResult::fulfilled(1u8);
        let _ = handle.clone().await;
        assert!(format!("{:?}", handle).contains("fulfilled"));
    }
}
