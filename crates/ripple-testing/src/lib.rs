//! Testing utilities for Ripple.
//!
//! [`TestStore`] is a minimal host: a state cell, a reducer and the engine's
//! interceptor wired in front of it. [`ErrorLog`] collects everything the
//! engine reports so tests can assert on it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use ripple::{Action, Engine, Event, Host, Intercepted, Interceptor, RaisedBy, State};

type Reducer<E, S> = Box<dyn Fn(&mut S, &E) + Send + Sync>;

/// In-memory host store for exercising an [`Engine`].
pub struct TestStore<E, S> {
    state: RwLock<S>,
    reducer: Reducer<E, S>,
    interceptor: Interceptor<E, S>,
    history: Mutex<Vec<E>>,
}

impl<E: Event, S: State> TestStore<E, S> {
    /// Builds a store whose pipeline is `engine`'s interceptor followed by
    /// `reducer`. Also installs the test subscriber via [`init_tracing`].
    pub fn new<R>(engine: &Engine<E, S>, initial: S, reducer: R) -> Arc<Self>
    where
        R: Fn(&mut S, &E) + Send + Sync + 'static,
    {
        init_tracing();
        Arc::new_cyclic(|store: &Weak<Self>| {
            let host: Weak<dyn Host<E, S>> = store.clone();
            Self {
                state: RwLock::new(initial),
                reducer: Box::new(reducer),
                interceptor: engine.interceptor(host),
                history: Mutex::new(Vec::new()),
            }
        })
    }

    /// Submits an action and returns what the interceptor did with it.
    pub fn dispatch(&self, action: impl Into<Action<E, S>>) -> Intercepted<E, S, ()> {
        self.interceptor.handle(action.into(), |event| {
            (self.reducer)(&mut self.state.write(), event);
            self.history.lock().push(event.clone());
        })
    }

    pub fn state(&self) -> S {
        self.state.read().clone()
    }

    /// Every event that reached the reducer, in order.
    pub fn history(&self) -> Vec<E> {
        self.history.lock().clone()
    }

    pub fn engine(&self) -> &Engine<E, S> {
        self.interceptor.engine()
    }
}

impl<E: Event, S: State> Host<E, S> for TestStore<E, S> {
    fn dispatch(&self, action: Action<E, S>) {
        TestStore::dispatch(self, action);
    }

    fn get_state(&self) -> S {
        self.state()
    }
}

/// A failure reported to the engine's error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub message: String,
    pub raised_by: RaisedBy,
}

/// Collects reported errors. Install with [`ErrorLog::install`].
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    reported: Arc<Mutex<Vec<ReportedError>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine that reports into this log.
    pub fn install<E: Event, S: State>(&self) -> Engine<E, S> {
        let reported = self.reported.clone();
        Engine::builder()
            .name("test")
            .on_error(move |err, info| {
                reported.lock().push(ReportedError {
                    message: format!("{err:#}"),
                    raised_by: info.raised_by,
                });
            })
            .build()
    }

    pub fn errors(&self) -> Vec<ReportedError> {
        self.reported.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reported.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.lock().is_empty()
    }
}

/// Waits until `engine` has no effect invocations in flight.
///
/// Sleeps between checks so paused-clock tests keep advancing.
pub async fn settle<E: Event, S: State>(engine: &Engine<E, S>) {
    while engine.executing_count() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Installs a `RUST_LOG`-driven subscriber for test output. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
