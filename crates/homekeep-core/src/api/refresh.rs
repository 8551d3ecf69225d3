//! Single-flight token refresh.
//!
//! The coordinator is a two-state machine. The first request to fail with an
//! expired token moves it from `Idle` to `Refreshing` and is told to start the
//! refresh exchange; every later failure while `Refreshing` joins the pending
//! replay queue instead. Whoever runs the exchange calls [`RefreshCoordinator::finish`],
//! which returns to `Idle` and hands back the queue in one step, so a queue
//! never spans two refresh cycles.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::{ApiError, AuthFailure, RequestDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

enum RefreshState<T> {
    Idle,
    Refreshing(VecDeque<PendingReplay<T>>),
}

/// A request suspended behind the in-flight refresh
pub struct PendingReplay<T> {
    request: RequestDescriptor,
    reply: oneshot::Sender<Result<T, ApiError>>,
}

/// Handle returned to a request that joined the coordinator.
pub struct Ticket<T> {
    starts_refresh: bool,
    receiver: oneshot::Receiver<Result<T, ApiError>>,
}

impl<T> Ticket<T> {
    /// `true` for the request that moved the coordinator out of `Idle`;
    /// its owner must run the refresh exchange and call `finish`.
    pub fn starts_refresh(&self) -> bool {
        self.starts_refresh
    }

    /// Wait for the replayed result
    pub async fn wait(self) -> Result<T, ApiError> {
        match self.receiver.await {
            Ok(result) => result,
            // The refresh task went away without resolving us
            Err(_) => Err(ApiError::AuthInvalid(AuthFailure::RefreshUnavailable)),
        }
    }
}

pub struct RefreshCoordinator<T> {
    state: Mutex<RefreshState<T>>,
}

impl<T> Default for RefreshCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefreshCoordinator<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        match *self.lock() {
            RefreshState::Idle => RefreshPhase::Idle,
            RefreshState::Refreshing(_) => RefreshPhase::Refreshing,
        }
    }

    /// Queue a request that failed with an expired token.
    ///
    /// The request is marked retried. If no refresh is in flight this starts
    /// one and the returned ticket says so.
    pub fn join(&self, mut request: RequestDescriptor) -> Ticket<T> {
        debug_assert!(!request.retried, "retried requests must not re-enter refresh");
        request.retried = true;

        let (reply, receiver) = oneshot::channel();
        let pending = PendingReplay { request, reply };

        let mut state = self.lock();
        let starts_refresh = match &mut *state {
            RefreshState::Idle => {
                *state = RefreshState::Refreshing(VecDeque::from([pending]));
                true
            }
            RefreshState::Refreshing(queue) => {
                queue.push_back(pending);
                debug!(queued = queue.len(), "Joined in-flight token refresh");
                false
            }
        };

        Ticket {
            starts_refresh,
            receiver,
        }
    }

    /// Return to `Idle` and take every request queued during this cycle.
    pub fn finish(&self) -> PendingReplayQueue<T> {
        let previous = std::mem::replace(&mut *self.lock(), RefreshState::Idle);
        let entries = match previous {
            RefreshState::Idle => VecDeque::new(),
            RefreshState::Refreshing(queue) => queue,
        };
        PendingReplayQueue { entries }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RefreshState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Requests drained from one refresh cycle, in the order their 401s arrived.
pub struct PendingReplayQueue<T> {
    entries: VecDeque<PendingReplay<T>>,
}

impl<T> PendingReplayQueue<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reissue each request in FIFO order and deliver the result to its caller.
    ///
    /// Each replay completes before the next is issued. A caller that stopped
    /// waiting still has its request replayed; only the result is dropped.
    pub async fn replay_in_order<F, Fut>(self, mut replay: F)
    where
        F: FnMut(RequestDescriptor) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        for PendingReplay { request, reply } in self.entries {
            let path = request.path.clone();
            let result = replay(request).await;
            if reply.send(result).is_err() {
                debug!(%path, "Caller stopped waiting for replayed request");
            }
        }
    }

    /// Fail every queued request with a terminal authentication error
    pub fn reject_all(self, failure: AuthFailure) {
        for PendingReplay { reply, .. } in self.entries {
            let _ = reply.send(Err(ApiError::AuthInvalid(failure)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> RequestDescriptor {
        RequestDescriptor::get(path)
    }

    #[test]
    fn test_first_failure_starts_refresh() {
        let coordinator = RefreshCoordinator::<String>::new();
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);

        let first = coordinator.join(request("/a"));
        let second = coordinator.join(request("/b"));
        let third = coordinator.join(request("/c"));

        assert!(first.starts_refresh());
        assert!(!second.starts_refresh());
        assert!(!third.starts_refresh());
        assert_eq!(coordinator.phase(), RefreshPhase::Refreshing);
    }

    #[test]
    fn test_finish_returns_to_idle_and_drains_once() {
        let coordinator = RefreshCoordinator::<String>::new();
        let _a = coordinator.join(request("/a"));
        let _b = coordinator.join(request("/b"));

        let queue = coordinator.finish();
        assert_eq!(queue.len(), 2);
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);

        // A second finish has nothing left to drain
        assert!(coordinator.finish().is_empty());

        // The next failure starts a fresh cycle with its own queue
        let c = coordinator.join(request("/c"));
        assert!(c.starts_refresh());
        assert_eq!(coordinator.finish().len(), 1);
    }

    #[tokio::test]
    async fn test_replays_in_fifo_order() {
        let coordinator = RefreshCoordinator::<String>::new();
        let a = coordinator.join(request("/a"));
        let b = coordinator.join(request("/b"));
        let c = coordinator.join(request("/c"));

        let mut issued = Vec::new();
        coordinator
            .finish()
            .replay_in_order(|req| {
                assert!(req.retried);
                issued.push(req.path.clone());
                async move { Ok(format!("done {}", req.path)) }
            })
            .await;

        assert_eq!(issued, vec!["/a", "/b", "/c"]);
        assert_eq!(a.wait().await.unwrap(), "done /a");
        assert_eq!(b.wait().await.unwrap(), "done /b");
        assert_eq!(c.wait().await.unwrap(), "done /c");
    }

    #[tokio::test]
    async fn test_reject_all_is_terminal() {
        let coordinator = RefreshCoordinator::<String>::new();
        let a = coordinator.join(request("/a"));
        let b = coordinator.join(request("/b"));

        coordinator
            .finish()
            .reject_all(AuthFailure::RefreshRejected);

        for ticket in [a, b] {
            assert!(matches!(
                ticket.wait().await,
                Err(ApiError::AuthInvalid(AuthFailure::RefreshRejected))
            ));
        }
        assert_eq!(coordinator.phase(), RefreshPhase::Idle);
    }

    #[tokio::test]
    async fn test_abandoned_caller_still_replayed() {
        let coordinator = RefreshCoordinator::<String>::new();
        let a = coordinator.join(request("/a"));
        drop(coordinator.join(request("/b")));

        let mut issued = Vec::new();
        coordinator
            .finish()
            .replay_in_order(|req| {
                issued.push(req.path.clone());
                async { Ok(String::new()) }
            })
            .await;

        assert_eq!(issued, vec!["/a", "/b"]);
        assert!(a.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_queue_fails_waiters() {
        let coordinator = RefreshCoordinator::<String>::new();
        let a = coordinator.join(request("/a"));
        drop(coordinator.finish());

        assert!(matches!(
            a.wait().await,
            Err(ApiError::AuthInvalid(AuthFailure::RefreshUnavailable))
        ));
    }
}
