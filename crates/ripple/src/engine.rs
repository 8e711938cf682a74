//! Engine: registration surface and effect invocation.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::api::{ListenerApi, OriginalState};
use crate::core::{Event, State};
use crate::descriptor::Listener;
use crate::error::{default_error_handler, ErrorHandler, ErrorInfo, RaisedBy};
use crate::interceptor::{Host, Interceptor};
use crate::registry::{ListenerEntry, Registry, RemoveOptions, Unsubscribe};
use crate::scope::{AbortReason, Scope};
use crate::task::{run_task, spawn_eager, JoinList, TaskResult};

/// Engine settings that can be loaded from host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recorded on every log line and listener span.
    pub name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "ripple".to_string(),
        }
    }
}

struct EngineInner<E, S> {
    config: EngineConfig,
    registry: Arc<Registry<E, S>>,
    on_error: ErrorHandler,
    runtime: Option<Handle>,
}

/// An effect-orchestration engine.
///
/// Owns its listener registry; independent engines never share listeners.
/// Cloning yields another handle to the same engine.
pub struct Engine<E, S> {
    inner: Arc<EngineInner<E, S>>,
}

impl<E: Event, S: State> Engine<E, S> {
    /// Engine with default settings.
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder<E, S> {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Registers a listener. Registering an identical `(descriptor, effect)`
    /// pair again returns a handle to the existing listener.
    pub fn add_listener(&self, listener: Listener<E, S>) -> Unsubscribe<E, S> {
        let (entry, created) = self.inner.registry.add(listener);
        if created {
            tracing::debug!(engine = %self.inner.config.name, listener_id = %entry.id, "listener added");
        } else {
            tracing::debug!(engine = %self.inner.config.name, listener_id = %entry.id, "listener already registered");
        }
        Unsubscribe::new(entry)
    }

    /// Registers without logging; used for short-lived internal listeners.
    pub(crate) fn register(&self, listener: Listener<E, S>) -> Unsubscribe<E, S> {
        let (entry, _) = self.inner.registry.add(listener);
        Unsubscribe::new(entry)
    }

    /// Removes the listener registered with this `(descriptor, effect)`
    /// pair. Returns whether one was found.
    pub fn remove_listener(&self, listener: &Listener<E, S>, options: RemoveOptions) -> bool {
        let removed = self.inner.registry.remove(listener, options);
        tracing::debug!(
            engine = %self.inner.config.name,
            removed,
            cancel_active = options.cancel_active,
            "remove listener"
        );
        removed
    }

    /// Cancels every executing invocation and removes every listener.
    pub fn clear_all(&self) {
        let executing = self.inner.registry.executing_count();
        let removed = self.inner.registry.clear();
        tracing::debug!(engine = %self.inner.config.name, removed, executing, "cleared all listeners");
    }

    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of effect invocations currently in flight.
    pub fn executing_count(&self) -> usize {
        self.inner.registry.executing_count()
    }

    /// Builds the interceptor to install in `host`'s submission pipeline.
    ///
    /// The interceptor only holds a weak reference, so the host may own it.
    pub fn interceptor(&self, host: Weak<dyn Host<E, S>>) -> Interceptor<E, S> {
        Interceptor::new(self.clone(), host)
    }

    pub(crate) fn registry(&self) -> &Registry<E, S> {
        &self.inner.registry
    }

    /// Starts one effect invocation for `entry`.
    ///
    /// The effect runs inline up to its first suspension point; the rest
    /// continues on the runtime. `before` is readable through
    /// `get_original_state` only during that inline turn.
    pub(crate) fn notify(
        &self,
        entry: Arc<ListenerEntry<E, S>>,
        event: E,
        host: &Arc<dyn Host<E, S>>,
        before: &S,
    ) {
        let original = OriginalState::new(before.clone());
        let scope = Scope::new();
        let joins = JoinList::default();
        entry.add_pending(scope.clone());
        self.inner.registry.track(&entry);

        let guard = InvocationGuard {
            registry: self.inner.registry.clone(),
            entry: entry.clone(),
            scope: scope.clone(),
        };
        let api = ListenerApi {
            engine: self.clone(),
            host: host.clone(),
            entry: entry.clone(),
            scope,
            original: original.clone(),
            joins: joins.clone(),
        };

        let span = tracing::debug_span!(
            "listener",
            engine = %self.inner.config.name,
            listener_id = %entry.id,
            event_type = %event.event_type(),
        );
        let engine = self.clone();
        let effect = entry.effect.clone();
        let invocation = async move {
            match run_task(effect.run(event, api), || {}).await {
                TaskResult::Ok(()) => tracing::trace!("effect completed"),
                TaskResult::Cancelled(cancelled) => {
                    tracing::trace!(reason = %cancelled.reason(), "effect cancelled")
                }
                TaskResult::Rejected(err) => engine.report(&err, RaisedBy::Effect),
            }
            joins.join_all().await;
            drop(guard);
        }
        .instrument(span)
        .boxed();

        let first_turn_done = || original.close();
        if let Err(err) = spawn_eager(self.inner.runtime.as_ref(), invocation, first_turn_done) {
            tracing::warn!(engine = %self.inner.config.name, "listener effect could not be scheduled");
            self.report(&err.into(), RaisedBy::Effect);
        }
    }

    /// Hands `err` to the error handler. A panicking handler is re-raised on
    /// a fresh task so it cannot unwind through the current dispatch pass.
    pub(crate) fn report(&self, err: &anyhow::Error, raised_by: RaisedBy) {
        let handler = &self.inner.on_error;
        let info = ErrorInfo { raised_by };
        let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(err, info))) else {
            return;
        };

        let runtime = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        match runtime {
            Some(runtime) => {
                runtime.spawn(async move { std::panic::resume_unwind(payload) });
            }
            None => tracing::error!(
                engine = %self.inner.config.name,
                "error handler panicked and no runtime is available to re-raise it"
            ),
        }
    }
}

impl<E: Event, S: State> Default for Engine<E, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, S> Clone for Engine<E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E, S> fmt::Debug for Engine<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Settles an invocation's bookkeeping, also when the invocation future is
/// dropped before finishing.
struct InvocationGuard<E: Event, S: State> {
    registry: Arc<Registry<E, S>>,
    entry: Arc<ListenerEntry<E, S>>,
    scope: Scope,
}

impl<E: Event, S: State> Drop for InvocationGuard<E, S> {
    fn drop(&mut self) {
        self.scope.abort(AbortReason::TaskCompleted);
        self.registry.untrack(&self.entry);
        self.entry.remove_pending(&self.scope);
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder<E, S> {
    config: EngineConfig,
    on_error: Option<ErrorHandler>,
    runtime: Option<Handle>,
    _marker: PhantomData<fn() -> (E, S)>,
}

impl<E: Event, S: State> EngineBuilder<E, S> {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            on_error: None,
            runtime: None,
            _marker: PhantomData,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Receives predicate and effect failures. Defaults to logging them.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error, ErrorInfo) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Runtime that continues suspended effects. Defaults to the runtime
    /// current at submission time.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Engine<E, S> {
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                registry: Registry::new(),
                on_error: self.on_error.unwrap_or_else(default_error_handler),
                runtime: self.runtime,
            }),
        }
    }
}

impl<E: Event, S: State> Default for EngineBuilder<E, S> {
    fn default() -> Self {
        Self::new()
    }
}
