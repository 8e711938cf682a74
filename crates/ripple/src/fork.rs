//! Forked child tasks.
//!
//! A fork runs under a child of the invoking listener's scope: it aborts when
//! the listener aborts (including when the listener finishes), while
//! cancelling the fork leaves the listener alone. Auto-joined forks hold the
//! listener invocation open until they settle.

use std::future::Future;
use std::time::Duration;

use crate::error::Cancelled;
use crate::scope::{AbortReason, Scope};
use crate::task::{settle_join, JoinList, TaskHandle, TaskResult};

/// Options for [`ListenerApi::fork`](crate::ListenerApi::fork).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForkOptions {
    /// Make the listener invocation wait for this fork before finishing.
    pub auto_join: bool,
}

impl ForkOptions {
    pub fn auto_join() -> Self {
        Self { auto_join: true }
    }
}

/// API handed to a fork executor.
#[derive(Debug, Clone)]
pub struct ForkApi {
    scope: Scope,
}

impl ForkApi {
    /// Races `future` against the fork's scope.
    pub async fn pause<F: Future>(&self, future: F) -> Result<F::Output, Cancelled> {
        self.scope.pause(future).await
    }

    pub async fn delay(&self, duration: Duration) -> Result<(), Cancelled> {
        self.scope.delay(duration).await
    }

    /// The fork's own scope.
    pub fn signal(&self) -> &Scope {
        &self.scope
    }
}

/// Handle to a forked task.
pub struct ForkedTask<T> {
    task: TaskHandle<T>,
    parent: Scope,
}

impl<T: Send + 'static> ForkedTask<T> {
    /// Aborts the fork with `TaskCancelled`. The parent is unaffected.
    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn signal(&self) -> &Scope {
        self.task.scope()
    }

    /// Waits for the fork to settle.
    ///
    /// Fails with [`Cancelled`] if the parent scope aborts first, so `?`
    /// stops the awaiting listener as well.
    pub async fn result(self) -> Result<TaskResult<T>, Cancelled> {
        let parent = self.parent;
        let join = self.task.into_join();
        parent.pause(join).await.map(settle_join)
    }
}

/// Starts `executor` under a child of `parent`.
pub(crate) fn fork<T, F, Fut>(
    parent: &Scope,
    joins: &JoinList,
    executor: F,
    options: ForkOptions,
) -> ForkedTask<T>
where
    T: Send + 'static,
    F: FnOnce(ForkApi) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let child = parent.child();
    let latch = options.auto_join.then(|| joins.register());

    let work_parent = parent.clone();
    let work_child = child.clone();
    let work = async move {
        work_parent.throw_if_aborted()?;
        work_child.throw_if_aborted()?;
        let api = ForkApi {
            scope: work_child.clone(),
        };
        let value = executor(api).await?;
        work_child.throw_if_aborted()?;
        anyhow::Ok(value)
    };

    let settle = child.clone();
    let task = TaskHandle::spawn(child, work, move || {
        settle.abort(AbortReason::TaskCompleted);
        drop(latch);
    });

    tracing::trace!(auto_join = options.auto_join, "fork started");

    ForkedTask {
        task,
        parent: parent.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fork_returns_executor_value() {
        let parent = Scope::new();
        let joins = JoinList::default();
        let task = fork(&parent, &joins, |_| async { anyhow::Ok(42) }, ForkOptions::default());

        let result = task.result().await.unwrap();
        assert_eq!(result.ok(), Some(42));
    }

    #[tokio::test]
    async fn fork_fails_fast_when_parent_already_aborted() {
        let parent = Scope::new();
        let joins = JoinList::default();
        parent.abort(AbortReason::ListenerCancelled);

        let task = fork(&parent, &joins, |_| async { anyhow::Ok(()) }, ForkOptions::default());
        let result = task.task.result().await;
        assert!(result.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_abort_propagates_to_fork() {
        let parent = Scope::new();
        let joins = JoinList::default();
        let task = fork(
            &parent,
            &joins,
            |api| async move {
                api.delay(Duration::from_secs(60)).await?;
                anyhow::Ok(())
            },
            ForkOptions::default(),
        );
        let signal = task.signal().clone();

        tokio::time::sleep(Duration::from_millis(1)).await;
        parent.abort(AbortReason::ListenerCancelled);

        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some(AbortReason::ListenerCancelled));
        assert!(task.task.result().await.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn fork_cancel_does_not_touch_parent() {
        let parent = Scope::new();
        let joins = JoinList::default();
        let task = fork(
            &parent,
            &joins,
            |api| async move {
                api.delay(Duration::from_secs(60)).await?;
                anyhow::Ok(())
            },
            ForkOptions::default(),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        task.cancel();

        assert!(!parent.is_aborted());
        let result = task.result().await.unwrap();
        match result {
            TaskResult::Cancelled(cancelled) => {
                assert_eq!(cancelled.reason(), AbortReason::TaskCancelled)
            }
            other => panic!("expected cancellation, got {}", other.status()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn awaiting_result_fails_when_parent_aborts() {
        let parent = Scope::new();
        let joins = JoinList::default();
        let task = fork(
            &parent,
            &joins,
            |_| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(())
            },
            ForkOptions::default(),
        );

        let aborter = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            aborter.abort(AbortReason::ListenerCancelled);
        });

        let err = task.result().await.unwrap_err();
        assert_eq!(err.reason(), AbortReason::ListenerCancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_join_registers_with_parent_join_list() {
        let parent = Scope::new();
        let joins = JoinList::default();
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = done.clone();
        let _task = fork(
            &parent,
            &joins,
            move |api| async move {
                api.delay(Duration::from_millis(20)).await?;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                anyhow::Ok(())
            },
            ForkOptions::auto_join(),
        );

        joins.join_all().await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }
}
