//! # Counter Demo
//!
//! A counter store with three listeners:
//! - a threshold alert driven by a before/after state predicate
//! - a debounced autosave that keeps only the newest invocation alive
//! - a session watcher that forks a heartbeat and waits for logout
//!
//! Run with `RUST_LOG=ripple=trace` to see every match and settle.

use std::time::Duration;

use anyhow::Result;
use ripple::{
    effect, event_types, Descriptor, Engine, ForkApi, ForkOptions, Listener, ListenerApi,
};
use ripple_testing::{settle, TestStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Events and state
// ============================================================================

#[derive(Debug, Clone)]
enum CounterEvent {
    Incremented,
    AddedBy(u32),
    Saved { count: u32 },
    LoggedIn,
    LoggedOut,
    Heartbeat,
}

event_types!(CounterEvent {
    Incremented => "counter/incremented",
    AddedBy => "counter/addedBy",
    Saved => "counter/saved",
    LoggedIn => "session/loggedIn",
    LoggedOut => "session/loggedOut",
    Heartbeat => "session/heartbeat",
});

#[derive(Debug, Clone, Default)]
struct CounterState {
    count: u32,
    saved: Option<u32>,
    heartbeats: u32,
}

fn reduce(state: &mut CounterState, event: &CounterEvent) {
    match event {
        CounterEvent::Incremented => state.count += 1,
        CounterEvent::AddedBy(n) => state.count += n,
        CounterEvent::Saved { count } => state.saved = Some(*count),
        CounterEvent::Heartbeat => state.heartbeats += 1,
        CounterEvent::LoggedIn | CounterEvent::LoggedOut => {}
    }
}

type Api = ListenerApi<CounterEvent, CounterState>;

// ============================================================================
// Listeners
// ============================================================================

fn threshold_alert() -> Listener<CounterEvent, CounterState> {
    Listener::new(
        Descriptor::predicate(|_: &CounterEvent, after: &CounterState, before: &CounterState| {
            before.count < 10 && after.count >= 10
        }),
        effect(|_: CounterEvent, api: Api| {
            info!(count = api.get_state().count, "counter crossed 10");
            async { anyhow::Ok(()) }
        }),
    )
}

fn autosave() -> Listener<CounterEvent, CounterState> {
    Listener::new(
        Descriptor::guard(|event: &CounterEvent| {
            matches!(event, CounterEvent::Incremented | CounterEvent::AddedBy(_))
        }),
        effect(|_: CounterEvent, api: Api| {
            api.cancel_active_listeners();
            async move {
                api.delay(Duration::from_millis(50)).await?;
                let count = api.get_state().count;
                api.dispatch(CounterEvent::Saved { count });
                anyhow::Ok(())
            }
        }),
    )
}

fn session_watcher() -> Listener<CounterEvent, CounterState> {
    Listener::new(
        "session/loggedIn",
        effect(|_: CounterEvent, api: Api| {
            let logged_out = api.condition("session/loggedOut", Some(Duration::from_secs(1)));
            async move {
                let host = api.clone();
                let heartbeat = api.fork(
                    move |fork: ForkApi| async move {
                        while !fork.signal().is_aborted() {
                            fork.delay(Duration::from_millis(20)).await?;
                            host.dispatch(CounterEvent::Heartbeat);
                        }
                        anyhow::Ok(())
                    },
                    ForkOptions::default(),
                );

                if logged_out.await? {
                    info!("session ended by logout");
                } else {
                    info!("session timed out");
                }
                heartbeat.cancel();
                anyhow::Ok(())
            }
        }),
    )
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ripple=debug".parse()?))
        .init();

    let engine: Engine<CounterEvent, CounterState> = Engine::builder()
        .name("counter-demo")
        .on_error(|err, info| warn!(raised_by = %info.raised_by, "listener failed: {err:#}"))
        .build();
    let store = TestStore::new(&engine, CounterState::default(), reduce);

    engine.add_listener(threshold_alert());
    engine.add_listener(autosave());
    engine.add_listener(session_watcher());

    for _ in 0..3 {
        store.dispatch(CounterEvent::Incremented);
    }
    store.dispatch(CounterEvent::AddedBy(8));
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("Saved once after the burst: {:?}", store.state().saved);

    store.dispatch(CounterEvent::LoggedIn);
    tokio::time::sleep(Duration::from_millis(70)).await;
    store.dispatch(CounterEvent::LoggedOut);
    settle(&engine).await;

    let state = store.state();
    println!(
        "Final state: count={} saved={:?} heartbeats={}",
        state.count, state.saved, state.heartbeats
    );

    engine.clear_all();
    Ok(())
}
