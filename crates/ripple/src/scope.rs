//! Cancellation scopes.
//!
//! A [`Scope`] is a cancellation signal with a reason. Scopes form a tree:
//! aborting a scope aborts every descendant with the same reason, but a child
//! never aborts its parent.
//!
//! ```text
//! listener scope ──abort(ListenerCancelled)──┐
//!     │                                      │
//!     ├─► fork scope A   (aborted, same reason)
//!     └─► fork scope B   (aborted, same reason)
//!
//! fork scope A ──abort(TaskCancelled)──► listener scope untouched
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Why a scope was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    /// The listener was cancelled (explicit cancel, unsubscribe with
    /// `cancel_active`, sibling cancellation, or clear-all).
    ListenerCancelled,
    /// A task or fork was cancelled through its own handle.
    TaskCancelled,
    /// The task already finished; later aborts are no-ops.
    TaskCompleted,
}

impl AbortReason {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            AbortReason::ListenerCancelled => "listener-cancelled",
            AbortReason::TaskCancelled => "task-cancelled",
            AbortReason::TaskCompleted => "task-completed",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

struct ScopeInner {
    token: CancellationToken,
    reason: OnceLock<AbortReason>,
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

impl ScopeInner {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Records `reason` (unless one is already set), aborts live children,
    /// then cancels this scope's token.
    fn abort(&self, reason: AbortReason) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.reason.set(reason);
        let reason = self.reason.get().copied().unwrap_or(reason);
        let children: Vec<Arc<ScopeInner>> =
            self.children.lock().iter().filter_map(Weak::upgrade).collect();
        for child in children {
            child.abort(reason);
        }
        self.token.cancel();
    }
}

/// Cancellation scope with an abort reason.
///
/// Cloning a scope yields another handle to the same signal. A parent holds
/// only weak handles to its children, and children hold nothing of their
/// parent.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a root scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner::new()),
        }
    }

    /// Creates a child scope that aborts, with the same reason, whenever
    /// `self` aborts.
    pub fn child(&self) -> Self {
        let child = Arc::new(ScopeInner::new());
        {
            let mut children = self.inner.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // Registered after the parent aborted: the propagation pass missed it.
        if let Some(reason) = self.inner.reason.get() {
            child.abort(*reason);
        }
        Self { inner: child }
    }

    /// Aborts the scope and all descendants. A second call is a no-op.
    pub fn abort(&self, reason: AbortReason) {
        self.inner.abort(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Reason the scope was aborted. A scope aborted through an ancestor
    /// carries that ancestor's reason.
    pub fn reason(&self) -> Option<AbortReason> {
        self.inner.reason.get().copied()
    }

    /// Returns `Err(Cancelled)` if the scope has been aborted.
    pub fn throw_if_aborted(&self) -> Result<(), Cancelled> {
        if self.is_aborted() {
            return Err(self.cancellation());
        }
        Ok(())
    }

    /// Resolves once the scope is aborted.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// Races `future` against the scope's abort.
    ///
    /// Fails if the scope is aborted before the call, before `future`
    /// completes, or by the time it completes.
    pub async fn pause<F>(&self, future: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        self.throw_if_aborted()?;
        let output = tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => return Err(self.cancellation()),
            output = future => output,
        };
        self.throw_if_aborted()?;
        Ok(output)
    }

    /// Sleeps for `duration` unless the scope aborts first.
    pub async fn delay(&self, duration: Duration) -> Result<(), Cancelled> {
        self.pause(tokio::time::sleep(duration)).await
    }

    /// True if both handles refer to the same scope.
    pub fn same_as(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cancellation(&self) -> Cancelled {
        Cancelled::new(self.reason().unwrap_or(AbortReason::TaskCancelled))
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}
