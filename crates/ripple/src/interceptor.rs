//! Pipeline-facing interception.
//!
//! ```text
//! submit(action)
//!     │
//!     ▼
//! Interceptor.handle()
//!     ├─► AddListener / RemoveListener / ClearAll ──► handled inline, stop
//!     │
//!     ├─► state_before = host.get_state()
//!     ├─► next(&event)                 (rest of the pipeline mutates state)
//!     ├─► state_after = host.get_state()
//!     │
//!     └─► for entry in registry.snapshot()
//!             predicate(event, after, before)?
//!                 └─► notify(entry)   (runs inline to first .await, then detached)
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Weak;

use crate::core::{Action, Event, State, CONTROL_PREFIX};
use crate::engine::Engine;
use crate::error::{panic_error, RaisedBy};
use crate::registry::Unsubscribe;

/// What the engine needs from the host store.
pub trait Host<E, S>: Send + Sync + 'static {
    /// Submits an action through the full pipeline, interceptor included.
    fn dispatch(&self, action: Action<E, S>);

    /// Current state snapshot.
    fn get_state(&self) -> S;
}

/// Result of passing an action through the interceptor.
pub enum Intercepted<E, S, R> {
    /// A domain event went through the rest of the pipeline.
    Forwarded(R),
    /// `AddListener` was handled.
    Subscribed(Unsubscribe<E, S>),
    /// `RemoveListener` was handled; true if a listener was removed.
    Removed(bool),
    /// `ClearAll` was handled.
    Cleared,
}

impl<E, S, R> Intercepted<E, S, R> {
    pub fn forwarded(self) -> Option<R> {
        match self {
            Intercepted::Forwarded(value) => Some(value),
            _ => None,
        }
    }

    pub fn subscribed(self) -> Option<Unsubscribe<E, S>> {
        match self {
            Intercepted::Subscribed(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn removed(&self) -> Option<bool> {
        match self {
            Intercepted::Removed(removed) => Some(*removed),
            _ => None,
        }
    }
}

impl<E, S, R: fmt::Debug> fmt::Debug for Intercepted<E, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intercepted::Forwarded(value) => f.debug_tuple("Forwarded").field(value).finish(),
            Intercepted::Subscribed(_) => f.write_str("Subscribed(..)"),
            Intercepted::Removed(removed) => f.debug_tuple("Removed").field(removed).finish(),
            Intercepted::Cleared => f.write_str("Cleared"),
        }
    }
}

/// The engine's plug-in point in a host pipeline.
pub struct Interceptor<E, S> {
    engine: Engine<E, S>,
    host: Weak<dyn Host<E, S>>,
}

impl<E: Event, S: State> Interceptor<E, S> {
    pub(crate) fn new(engine: Engine<E, S>, host: Weak<dyn Host<E, S>>) -> Self {
        Self { engine, host }
    }

    pub fn engine(&self) -> &Engine<E, S> {
        &self.engine
    }

    /// Handles one submitted action.
    ///
    /// Control actions are consumed here. Events are forwarded to `next`
    /// first; matching listeners are started afterwards and are not awaited.
    pub fn handle<R, N>(&self, action: Action<E, S>, next: N) -> Intercepted<E, S, R>
    where
        N: FnOnce(&E) -> R,
    {
        if action.is_control() {
            tracing::debug!(action_type = %action.action_type(), "control action");
        }
        let event = match action {
            Action::Event(event) => event,
            Action::AddListener(listener) => {
                return Intercepted::Subscribed(self.engine.add_listener(listener));
            }
            Action::RemoveListener(listener, options) => {
                return Intercepted::Removed(self.engine.remove_listener(&listener, options));
            }
            Action::ClearAll => {
                self.engine.clear_all();
                return Intercepted::Cleared;
            }
        };

        if event.event_type().starts_with(CONTROL_PREFIX) {
            tracing::warn!(
                event_type = %event.event_type(),
                "domain event uses the reserved control prefix"
            );
        }

        let Some(host) = self.host.upgrade() else {
            return Intercepted::Forwarded(next(&event));
        };

        let before = host.get_state();
        let result = next(&event);

        let registry = self.engine.registry();
        if registry.is_empty() {
            return Intercepted::Forwarded(result);
        }

        let after = host.get_state();
        for entry in registry.snapshot() {
            let matched = catch_unwind(AssertUnwindSafe(|| entry.matches(&event, &after, &before)));
            match matched {
                Ok(true) => {
                    tracing::trace!(listener_id = %entry.id, event_type = %event.event_type(), "listener matched");
                    self.engine.notify(entry, event.clone(), &host, &before);
                }
                Ok(false) => {}
                Err(payload) => self.engine.report(&panic_error(payload), RaisedBy::Predicate),
            }
        }

        Intercepted::Forwarded(result)
    }
}

impl<E, S> fmt::Debug for Interceptor<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
