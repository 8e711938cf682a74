//! The API handed to every effect invocation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::{Action, Event, State};
use crate::descriptor::Descriptor;
use crate::engine::Engine;
use crate::error::{Cancelled, ListenerError};
use crate::fork::{self, ForkApi, ForkOptions, ForkedTask};
use crate::interceptor::Host;
use crate::registry::ListenerEntry;
use crate::scope::{AbortReason, Scope};
use crate::take::{self, Taken};
use crate::task::JoinList;

/// The pre-submission state, readable only during an invocation's first
/// synchronous turn.
pub(crate) struct OriginalState<S> {
    slot: Arc<Mutex<Option<S>>>,
}

impl<S: State> OriginalState<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(state))),
        }
    }

    pub(crate) fn get(&self) -> Result<S, ListenerError> {
        self.slot
            .lock()
            .clone()
            .ok_or(ListenerError::OriginalStateUnavailable)
    }

    pub(crate) fn close(&self) {
        self.slot.lock().take();
    }
}

impl<S> Clone for OriginalState<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

/// Context for a single effect invocation.
///
/// Every invocation gets its own [`Scope`]. Cancellation is cooperative:
/// it is observed at [`throw_if_cancelled`](Self::throw_if_cancelled),
/// [`pause`](Self::pause), [`delay`](Self::delay), [`take`](Self::take),
/// [`condition`](Self::condition) and fork boundaries.
pub struct ListenerApi<E, S> {
    pub(crate) engine: Engine<E, S>,
    pub(crate) host: Arc<dyn Host<E, S>>,
    pub(crate) entry: Arc<ListenerEntry<E, S>>,
    pub(crate) scope: Scope,
    pub(crate) original: OriginalState<S>,
    pub(crate) joins: JoinList,
}

impl<E: Event, S: State> ListenerApi<E, S> {
    /// Current host state.
    pub fn get_state(&self) -> S {
        self.host.get_state()
    }

    /// State from just before the triggering submission.
    ///
    /// Only available before the effect first suspends; afterwards this
    /// returns [`ListenerError::OriginalStateUnavailable`].
    pub fn get_original_state(&self) -> Result<S, ListenerError> {
        self.original.get()
    }

    /// Submits an action through the host pipeline.
    pub fn dispatch(&self, action: impl Into<Action<E, S>>) {
        self.host.dispatch(action.into());
    }

    /// Waits for the next event matching `descriptor`.
    ///
    /// The one-shot listener is registered as soon as this is called, so
    /// events submitted before the returned future is first polled are seen.
    /// Resolves to `None` if `timeout` elapses first.
    pub fn take(
        &self,
        descriptor: impl Into<Descriptor<E, S>>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Option<Taken<E, S>>, Cancelled>> + Send + 'static {
        take::take(&self.engine, &self.scope, descriptor.into(), timeout)
    }

    /// Like [`take`](Self::take), reporting only whether a match arrived.
    pub fn condition(
        &self,
        descriptor: impl Into<Descriptor<E, S>>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<bool, Cancelled>> + Send + 'static {
        let taken = self.take(descriptor, timeout);
        async move { Ok::<_, Cancelled>(taken.await?.is_some()) }
    }

    pub async fn delay(&self, duration: Duration) -> Result<(), Cancelled> {
        self.scope.delay(duration).await
    }

    /// Races `future` against this invocation's cancellation.
    pub async fn pause<F: Future>(&self, future: F) -> Result<F::Output, Cancelled> {
        self.scope.pause(future).await
    }

    /// Starts a child task under this invocation's scope.
    pub fn fork<T, F, Fut>(&self, executor: F, options: ForkOptions) -> ForkedTask<T>
    where
        T: Send + 'static,
        F: FnOnce(ForkApi) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        fork::fork(&self.scope, &self.joins, executor, options)
    }

    pub fn signal(&self) -> &Scope {
        &self.scope
    }

    /// Removes this listener. The current invocation keeps running.
    pub fn unsubscribe(&self) {
        self.entry.unsubscribe();
    }

    /// Re-adds this listener after [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self) {
        self.entry.subscribe();
    }

    /// Aborts other in-flight invocations of this listener.
    pub fn cancel_active_listeners(&self) {
        let cancelled = self.entry.cancel_active(Some(&self.scope));
        tracing::trace!(cancelled, "cancelled sibling invocations");
    }

    /// Aborts this invocation.
    pub fn cancel(&self) {
        self.scope.abort(AbortReason::ListenerCancelled);
        self.entry.remove_pending(&self.scope);
    }

    pub fn throw_if_cancelled(&self) -> Result<(), Cancelled> {
        self.scope.throw_if_aborted()
    }

    pub fn listener_id(&self) -> Uuid {
        self.entry.id
    }

    /// The engine this listener is registered with.
    pub fn engine(&self) -> &Engine<E, S> {
        &self.engine
    }
}

impl<E, S> Clone for ListenerApi<E, S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            host: self.host.clone(),
            entry: self.entry.clone(),
            scope: self.scope.clone(),
            original: self.original.clone(),
            joins: self.joins.clone(),
        }
    }
}

impl<E, S> fmt::Debug for ListenerApi<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerApi")
            .field("listener_id", &self.entry.id)
            .field("signal", &self.scope)
            .finish_non_exhaustive()
    }
}
