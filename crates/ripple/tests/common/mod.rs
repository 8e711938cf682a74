#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ripple::{effect, event_types, EffectRef, ListenerApi};

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Ping,
    Pong,
    Add(u32),
    Reset,
}

event_types!(AppEvent {
    Ping => "app/ping",
    Pong => "app/pong",
    Add => "app/add",
    Reset => "app/reset",
});

pub type Api = ListenerApi<AppEvent, u32>;

pub fn reduce(state: &mut u32, event: &AppEvent) {
    match event {
        AppEvent::Add(n) => *state += n,
        AppEvent::Reset => *state = 0,
        AppEvent::Ping | AppEvent::Pong => {}
    }
}

/// Effect that bumps `hits` once per invocation.
pub fn counting(hits: &Arc<AtomicUsize>) -> EffectRef<AppEvent, u32> {
    let hits = hits.clone();
    effect(move |_: AppEvent, _: Api| {
        hits.fetch_add(1, Ordering::SeqCst);
        async { anyhow::Ok(()) }
    })
}

pub fn hits(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}
