//! # Ripple
//!
//! An effect-orchestration engine: listeners intercept events submitted
//! through a host pipeline and run cancellable effects.
//!
//! ## Core Concepts
//!
//! Ripple separates **state changes** from **side effects**:
//! - The host pipeline decides *how* state changes (reducers, stores).
//! - Ripple decides *which* effects run, *when*, and *how they stop*.
//!
//! A [`Listener`] pairs a [`Descriptor`] (what to react to) with an
//! [`Effect`] (what to do). Each matching submission starts one effect
//! invocation with its own cancellation [`Scope`].
//!
//! ## Architecture
//!
//! ```text
//! Host.dispatch(action)
//!     │
//!     ▼
//! Interceptor.handle() ──► next(&event) ──► host state mutates
//!     │
//!     ▼ snapshot()
//! Registry ────────────────────────────────────────┐
//!     │                                            │
//!     ├─► Entry A.predicate(event, after, before) ─┤─► notify ─► Effect A
//!     │                                            │              │
//!     ├─► Entry B.predicate(...) ─► false          │              ├─► take / condition
//!     │                                            │              ├─► fork ─► child scope
//!     └─► Entry C.predicate(...) ─► panic          │              └─► dispatch ─┐
//!                     │                            │                            │
//!                     └─► on_error(predicate)      └────────────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Snapshot before iterate** - listeners added or removed during a pass
//!    don't affect that pass
//! 2. **Registration order** - predicates run and effects start in the order
//!    listeners were registered
//! 3. **Effects are detached** - a submission waits for the pipeline, never
//!    for effects
//! 4. **Scopes are trees** - parents abort children, never the reverse
//! 5. **Aborted stays aborted** - the first reason wins
//! 6. **Failures are isolated** - predicate and effect failures go to the
//!    error handler; cancellation is never reported
//!
//! ## Guarantees
//!
//! - **Exactly once per match**: each matching listener runs once per
//!   submission
//! - **Cooperative cancellation**: observed at `throw_if_cancelled`, `pause`,
//!   `delay`, `take`, `condition` and fork boundaries
//! - **No leaked one-shots**: `take` always removes its temporary listener
//!
//! ## Example
//!
//! ```ignore
//! use ripple::{effect, event_types, Engine, Listener};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone)]
//! enum AuthEvent {
//!     LoginRequested { user: String },
//!     LoggedIn { user: String },
//!     LoggedOut,
//! }
//!
//! event_types!(AuthEvent {
//!     LoginRequested => "auth/loginRequested",
//!     LoggedIn => "auth/loggedIn",
//!     LoggedOut => "auth/loggedOut",
//! });
//!
//! let engine: Engine<AuthEvent, AppState> = Engine::builder()
//!     .on_error(|err, info| eprintln!("{}: {err:#}", info.raised_by))
//!     .build();
//!
//! engine.add_listener(Listener::new(
//!     "auth/loggedIn",
//!     effect(|_event, api| async move {
//!         // Keep only the newest session watcher alive.
//!         api.cancel_active_listeners();
//!         if api.condition("auth/loggedOut", Some(Duration::from_secs(3600))).await? {
//!             return anyhow::Ok(());
//!         }
//!         api.dispatch(AuthEvent::LoggedOut);
//!         anyhow::Ok(())
//!     }),
//! ));
//!
//! // Install in the host pipeline:
//! let interceptor = engine.interceptor(weak_host);
//! interceptor.handle(action, |event| reducer.apply(event));
//! ```
//!
//! ## What This Is Not
//!
//! Ripple is **not**:
//! - A store or reducer framework
//! - A job queue
//! - Preemptive: effects stop only where they check their scope

mod api;
mod core;
mod descriptor;
mod engine;
mod error;
mod fork;
mod interceptor;
mod macros;
mod registry;
mod scope;
mod take;
mod task;

// Re-export core traits and the submission unit
pub use crate::core::{
    Action, Event, State, ADD_LISTENER_TYPE, CLEAR_ALL_TYPE, CONTROL_PREFIX,
    REMOVE_LISTENER_TYPE,
};

// Re-export listener types
pub use api::ListenerApi;
pub use descriptor::{
    effect, Descriptor, Effect, EffectRef, EventMatcher, GuardFn, Listener, PredicateFn,
};
pub use registry::{RemoveOptions, Unsubscribe};

// Re-export engine types (primary entry point)
pub use engine::{Engine, EngineBuilder, EngineConfig};
pub use interceptor::{Host, Intercepted, Interceptor};

// Re-export concurrency primitives
pub use fork::{ForkApi, ForkOptions, ForkedTask};
pub use scope::{AbortReason, Scope};
pub use take::Taken;
pub use task::{TaskHandle, TaskResult, TaskStatus};

// Re-export error types
pub use crate::error::{Cancelled, ErrorHandler, ErrorInfo, ListenerError, RaisedBy};

// Re-export commonly used external types
pub use async_trait::async_trait;
