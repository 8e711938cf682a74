//! Task runner.
//!
//! Wraps a unit of async work and settles it into exactly one
//! [`TaskResult`]. Panics are caught and reported as rejections; a
//! [`Cancelled`] anywhere in an error chain becomes a cancellation.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::Context;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{panic_error, Cancelled, ListenerError};
use crate::scope::{AbortReason, Scope};

/// Outcome of a task. Exactly one variant is produced per task.
#[derive(Debug)]
pub enum TaskResult<T> {
    Ok(T),
    Rejected(anyhow::Error),
    Cancelled(Cancelled),
}

/// Discriminant of a [`TaskResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    Rejected,
    Cancelled,
}

impl TaskStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl<T> TaskResult<T> {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskResult::Ok(_) => TaskStatus::Ok,
            TaskResult::Rejected(_) => TaskStatus::Rejected,
            TaskResult::Cancelled(_) => TaskStatus::Cancelled,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TaskResult::Ok(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskResult::Cancelled(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            TaskResult::Ok(value) => Some(value),
            _ => None,
        }
    }

    /// Converts into a plain result so the outcome can be rethrown with `?`.
    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            TaskResult::Ok(value) => Ok(value),
            TaskResult::Rejected(err) => Err(err),
            TaskResult::Cancelled(cancelled) => Err(cancelled.into()),
        }
    }

    fn from_outcome(outcome: Result<anyhow::Result<T>, Box<dyn Any + Send>>) -> Self {
        match outcome {
            Ok(Ok(value)) => TaskResult::Ok(value),
            Ok(Err(err)) => match Cancelled::find(&err) {
                Some(cancelled) => TaskResult::Cancelled(cancelled),
                None => TaskResult::Rejected(err),
            },
            Err(payload) => TaskResult::Rejected(panic_error(payload)),
        }
    }
}

/// Runs `work` to completion, then calls `on_settle` exactly once.
pub(crate) async fn run_task<T, Fut, F>(work: Fut, on_settle: F) -> TaskResult<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
    F: FnOnce(),
{
    let outcome = AssertUnwindSafe(work).catch_unwind().await;
    on_settle();
    TaskResult::from_outcome(outcome)
}

/// Handle to a spawned task.
pub struct TaskHandle<T> {
    scope: Scope,
    join: JoinHandle<TaskResult<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawns `work` on the current runtime under `scope`.
    pub(crate) fn spawn<Fut, F>(scope: Scope, work: Fut, on_settle: F) -> Self
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let join = tokio::spawn(run_task(work, on_settle));
        Self { scope, join }
    }

    /// Aborts the task's scope. No-op once the task has settled.
    pub fn cancel(&self) {
        self.scope.abort(AbortReason::TaskCancelled);
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Waits for the task to settle.
    pub async fn result(self) -> TaskResult<T> {
        settle_join(self.join.await)
    }

    pub(crate) fn into_join(self) -> JoinHandle<TaskResult<T>> {
        self.join
    }
}

pub(crate) fn settle_join<T>(
    joined: Result<TaskResult<T>, tokio::task::JoinError>,
) -> TaskResult<T> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => {
            TaskResult::Cancelled(Cancelled::new(AbortReason::TaskCancelled))
        }
        Err(err) => TaskResult::Rejected(anyhow::anyhow!("task failed to join: {err}")),
    }
}

/// Completion promises a listener invocation waits on before it finishes.
#[derive(Clone, Default)]
pub(crate) struct JoinList {
    waiters: Arc<Mutex<Vec<oneshot::Receiver<()>>>>,
}

impl JoinList {
    /// Registers a waiter. The returned latch releases it when dropped.
    pub(crate) fn register(&self) -> oneshot::Sender<()> {
        let (latch, waiter) = oneshot::channel();
        self.waiters.lock().push(waiter);
        latch
    }

    /// Waits for every registered latch, including ones registered while
    /// waiting.
    pub(crate) async fn join_all(&self) {
        loop {
            let batch = std::mem::take(&mut *self.waiters.lock());
            if batch.is_empty() {
                return;
            }
            for waiter in batch {
                let _ = waiter.await;
            }
        }
    }
}

/// Polls `future` once in place, then hands it to the runtime if it is
/// still pending.
///
/// Effects therefore run synchronously up to their first suspension point
/// within the submission that triggered them. `first_turn_done` runs after
/// that inline poll and before any worker can resume the future.
pub(crate) fn spawn_eager<F>(
    runtime: Option<&Handle>,
    mut future: BoxFuture<'static, ()>,
    first_turn_done: F,
) -> Result<(), ListenerError>
where
    F: FnOnce(),
{
    let handle = match runtime.cloned().or_else(|| Handle::try_current().ok()) {
        Some(handle) => handle,
        None => return Err(ListenerError::NoRuntime),
    };
    let _enter = handle.enter();

    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    let poll = future.as_mut().poll(&mut cx);
    first_turn_done();
    if poll.is_pending() {
        handle.spawn(future);
    }
    Ok(())
}
