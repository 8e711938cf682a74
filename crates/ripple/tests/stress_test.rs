//! Randomized workloads checked against a simple model.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{counting, hits, reduce, Api, AppEvent};
use ripple::{effect, Listener, RemoveOptions, Unsubscribe};
use ripple_testing::{settle, ErrorLog, TestStore};

const TYPES: [&str; 3] = ["app/ping", "app/pong", "app/reset"];

fn event_for(event_type: &str) -> AppEvent {
    match event_type {
        "app/ping" => AppEvent::Ping,
        "app/pong" => AppEvent::Pong,
        _ => AppEvent::Reset,
    }
}

#[tokio::test]
async fn synchronous_listeners_match_the_model() {
    for seed in 0..20 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let log = ErrorLog::new();
        let engine = log.install::<AppEvent, u32>();
        let store = TestStore::new(&engine, 0, reduce);

        let mut live: HashMap<usize, (&str, Unsubscribe<AppEvent, u32>)> = HashMap::new();
        let mut counters = Vec::new();
        let mut expected = Vec::new();

        for _ in 0..200 {
            match rng.usize(..4) {
                0 => {
                    let event_type = TYPES[rng.usize(..TYPES.len())];
                    let counter = Arc::new(AtomicUsize::new(0));
                    let handle =
                        engine.add_listener(Listener::new(event_type, counting(&counter)));
                    live.insert(counters.len(), (event_type, handle));
                    counters.push(counter);
                    expected.push(0);
                }
                1 if !live.is_empty() => {
                    let keys: Vec<usize> = live.keys().copied().collect();
                    let key = keys[rng.usize(..keys.len())];
                    if let Some((_, handle)) = live.remove(&key) {
                        handle.unsubscribe();
                    }
                }
                _ => {
                    let event_type = TYPES[rng.usize(..TYPES.len())];
                    store.dispatch(event_for(event_type));
                    for (index, (listening_to, _)) in &live {
                        if *listening_to == event_type {
                            expected[*index] += 1;
                        }
                    }
                }
            }
        }

        settle(&engine).await;
        let actual: Vec<usize> = counters.iter().map(hits).collect();
        assert_eq!(actual, expected, "seed {seed}");
        assert_eq!(engine.listener_count(), live.len(), "seed {seed}");
        assert!(log.is_empty(), "seed {seed}");
    }
}

#[tokio::test(start_paused = true)]
async fn interleaved_waits_and_cancellations_leave_nothing_behind() {
    let mut rng = fastrand::Rng::with_seed(7);
    let log = ErrorLog::new();
    let engine = log.install::<AppEvent, u32>();
    let store = TestStore::new(&engine, 0, reduce);
    let settled = Arc::new(AtomicUsize::new(0));

    // Each `Add(n)` waits up to `n` ms for a pong, then lingers briefly.
    let finished = settled.clone();
    let listener = Listener::new(
        "app/add",
        effect(move |event: AppEvent, api: Api| {
            let finished = finished.clone();
            let millis = match event {
                AppEvent::Add(n) => u64::from(n),
                _ => 0,
            };
            let pong = api.condition("app/pong", Some(Duration::from_millis(millis)));
            async move {
                let _settled = CountOnDrop(finished);
                if !pong.await? {
                    api.delay(Duration::from_millis(5)).await?;
                }
                anyhow::Ok(())
            }
        }),
    );
    let mut waiter = engine.add_listener(listener.clone());

    let mut started = 0;
    for _ in 0..300 {
        match rng.usize(..10) {
            0..=4 => {
                store.dispatch(AppEvent::Add(rng.u32(1..40)));
                started += 1;
            }
            5..=7 => {
                store.dispatch(AppEvent::Pong);
            }
            8 => {
                waiter.unsubscribe_with(RemoveOptions::cancel_active());
                waiter = engine.add_listener(listener.clone());
            }
            _ => {
                tokio::time::sleep(Duration::from_millis(rng.u64(1..20))).await;
            }
        }
    }

    waiter.unsubscribe_with(RemoveOptions::cancel_active());
    settle(&engine).await;

    assert_eq!(settled.load(Ordering::SeqCst), started);
    assert_eq!(engine.executing_count(), 0);
    assert_eq!(engine.listener_count(), 0, "no temporary take listener leaked");
    assert!(log.is_empty());
}

struct CountOnDrop(Arc<AtomicUsize>);

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
