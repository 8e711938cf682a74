//! One-shot waits for the next matching event.

use std::future::Future;
use std::time::Duration;

use futures::future::Either;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::api::ListenerApi;
use crate::core::{Event, State};
use crate::descriptor::{effect, Descriptor, Listener};
use crate::engine::Engine;
use crate::error::Cancelled;
use crate::registry::Unsubscribe;
use crate::scope::Scope;

/// `(event, state_after, state_before)` captured by a take.
pub type Taken<E, S> = (E, S, S);

/// Removes the temporary listener however the take ends, including when
/// the waiting future is dropped.
struct TakeGuard<E: Event, S: State>(Unsubscribe<E, S>);

impl<E: Event, S: State> Drop for TakeGuard<E, S> {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

/// Registers a one-shot listener immediately and returns a future resolving
/// with the first matching triple, `None` on timeout, or `Err(Cancelled)`
/// if `scope` aborts first.
pub(crate) fn take<E, S>(
    engine: &Engine<E, S>,
    scope: &Scope,
    descriptor: Descriptor<E, S>,
    timeout: Option<Duration>,
) -> impl Future<Output = Result<Option<Taken<E, S>>, Cancelled>> + Send + 'static
where
    E: Event,
    S: State,
{
    if let Err(cancelled) = scope.throw_if_aborted() {
        return Either::Left(futures::future::ready(Err(cancelled)));
    }

    let (sender, receiver) = oneshot::channel::<Taken<E, S>>();
    let sender = Mutex::new(Some(sender));
    let one_shot = effect(move |event: E, api: ListenerApi<E, S>| {
        api.unsubscribe();
        let sender = sender.lock().take();
        let after = api.get_state();
        let before = api.get_original_state().unwrap_or_else(|_| after.clone());
        async move {
            if let Some(sender) = sender {
                let _ = sender.send((event, after, before));
            }
            anyhow::Ok(())
        }
    });

    let guard = TakeGuard(engine.register(Listener::new(descriptor, one_shot)));
    let scope = scope.clone();

    Either::Right(async move {
        let _guard = guard;
        let matched = async move {
            match receiver.await {
                Ok(taken) => taken,
                // The temporary listener was cleared away; only a timeout or
                // an abort can end this wait now.
                Err(_) => std::future::pending().await,
            }
        };
        let output = match timeout {
            Some(timeout) => scope
                .pause(tokio::time::timeout(timeout, matched))
                .await?
                .ok(),
            None => Some(scope.pause(matched).await?),
        };
        Ok::<_, Cancelled>(output)
    })
}
