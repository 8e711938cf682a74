//! Listener registry and the executing-listeners counter.
//!
//! ## Rules
//! - Entries keep registration order; dispatch iterates a [`snapshot`]
//!   so listeners added or removed mid-pass don't affect that pass.
//! - Locks are never held while user code runs.
//! - The executing counter outlives registry membership: an entry that was
//!   unsubscribed while its effect is still running stays reachable for
//!   [`Registry::clear`].
//!
//! [`snapshot`]: Registry::snapshot

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::core::{Event, State};
use crate::descriptor::{effect_addr, DescriptorKey, EffectRef, Listener, PredicateFn};
use crate::scope::{AbortReason, Scope};

/// Options for removing a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Abort every in-flight invocation of the removed listener.
    pub cancel_active: bool,
}

impl RemoveOptions {
    pub fn cancel_active() -> Self {
        Self {
            cancel_active: true,
        }
    }
}

pub(crate) type Snapshot<E, S> = SmallVec<[Arc<ListenerEntry<E, S>>; 8]>;

/// A registered listener.
pub(crate) struct ListenerEntry<E, S> {
    pub(crate) id: Uuid,
    key: DescriptorKey,
    predicate: PredicateFn<E, S>,
    pub(crate) effect: EffectRef<E, S>,
    /// One scope per in-flight invocation.
    pending: Mutex<SmallVec<[Scope; 2]>>,
    registry: Weak<Registry<E, S>>,
}

impl<E: Event, S: State> ListenerEntry<E, S> {
    pub(crate) fn matches(&self, event: &E, after: &S, before: &S) -> bool {
        (self.predicate)(event, after, before)
    }

    fn is(&self, key: &DescriptorKey, effect: usize) -> bool {
        self.key == *key && effect_addr(&self.effect) == effect
    }

    pub(crate) fn add_pending(&self, scope: Scope) {
        self.pending.lock().push(scope);
    }

    pub(crate) fn remove_pending(&self, scope: &Scope) {
        self.pending.lock().retain(|pending| !pending.same_as(scope));
    }

    /// Aborts in-flight invocations with `ListenerCancelled`, skipping
    /// `except`. Returns how many scopes were aborted.
    pub(crate) fn cancel_active(&self, except: Option<&Scope>) -> usize {
        let scopes: SmallVec<[Scope; 2]> = self
            .pending
            .lock()
            .iter()
            .filter(|scope| except.map_or(true, |own| !scope.same_as(own)))
            .cloned()
            .collect();
        for scope in &scopes {
            scope.abort(AbortReason::ListenerCancelled);
        }
        scopes.len()
    }

    /// Removes the entry from its registry. Idempotent.
    pub(crate) fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove_id(self.id),
            None => false,
        }
    }

    /// Puts a previously removed entry back at the end of the registry.
    pub(crate) fn subscribe(self: &Arc<Self>) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.reinsert(self.clone()),
            None => false,
        }
    }
}

struct Executing<E, S> {
    entry: Arc<ListenerEntry<E, S>>,
    count: usize,
}

/// Engine-owned listener registry.
pub(crate) struct Registry<E, S> {
    entries: Mutex<Vec<Arc<ListenerEntry<E, S>>>>,
    executing: DashMap<Uuid, Executing<E, S>>,
}

impl<E: Event, S: State> Registry<E, S> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            executing: DashMap::new(),
        })
    }

    /// Registers a listener, or returns the existing entry for an identical
    /// `(descriptor, effect)` pair. The flag is true for new entries.
    pub(crate) fn add(self: &Arc<Self>, listener: Listener<E, S>) -> (Arc<ListenerEntry<E, S>>, bool) {
        let (key, predicate) = listener.descriptor.normalize();
        let effect = effect_addr(&listener.effect);

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter().find(|entry| entry.is(&key, effect)) {
            return (existing.clone(), false);
        }

        let entry = Arc::new(ListenerEntry {
            id: Uuid::new_v4(),
            key,
            predicate,
            effect: listener.effect,
            pending: Mutex::new(SmallVec::new()),
            registry: Arc::downgrade(self),
        });
        entries.push(entry.clone());
        (entry, true)
    }

    pub(crate) fn find(&self, listener: &Listener<E, S>) -> Option<Arc<ListenerEntry<E, S>>> {
        let (key, _) = listener.descriptor.normalize();
        let effect = effect_addr(&listener.effect);
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.is(&key, effect))
            .cloned()
    }

    /// Removes the entry matching `listener`, optionally aborting its
    /// in-flight invocations. Returns whether an entry was found.
    pub(crate) fn remove(&self, listener: &Listener<E, S>, options: RemoveOptions) -> bool {
        let Some(entry) = self.find(listener) else {
            return false;
        };
        self.remove_id(entry.id);
        if options.cancel_active {
            entry.cancel_active(None);
        }
        true
    }

    fn remove_id(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    fn reinsert(&self, entry: Arc<ListenerEntry<E, S>>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|existing| existing.id == entry.id) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Point-in-time copy of the entries in registration order.
    pub(crate) fn snapshot(&self) -> Snapshot<E, S> {
        self.entries.lock().iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Aborts every executing invocation and empties the registry.
    /// Returns the number of entries removed.
    pub(crate) fn clear(&self) -> usize {
        let executing: Vec<Arc<ListenerEntry<E, S>>> = self
            .executing
            .iter()
            .map(|running| running.value().entry.clone())
            .collect();
        for entry in &executing {
            entry.cancel_active(None);
        }
        std::mem::take(&mut *self.entries.lock()).len()
    }

    pub(crate) fn track(&self, entry: &Arc<ListenerEntry<E, S>>) {
        self.executing
            .entry(entry.id)
            .and_modify(|running| running.count += 1)
            .or_insert_with(|| Executing {
                entry: entry.clone(),
                count: 1,
            });
    }

    pub(crate) fn untrack(&self, entry: &ListenerEntry<E, S>) {
        if let MapEntry::Occupied(mut running) = self.executing.entry(entry.id) {
            running.get_mut().count -= 1;
            if running.get().count == 0 {
                running.remove();
            }
        }
    }

    /// Total number of in-flight invocations.
    pub(crate) fn executing_count(&self) -> usize {
        self.executing.iter().map(|running| running.value().count).sum()
    }
}

/// Handle returned by listener registration.
///
/// Dropping the handle does not remove the listener.
pub struct Unsubscribe<E, S> {
    entry: Arc<ListenerEntry<E, S>>,
}

impl<E: Event, S: State> Unsubscribe<E, S> {
    pub(crate) fn new(entry: Arc<ListenerEntry<E, S>>) -> Self {
        Self { entry }
    }

    /// Removes the listener. Idempotent; in-flight invocations keep running.
    pub fn unsubscribe(&self) {
        self.unsubscribe_with(RemoveOptions::default());
    }

    /// Removes the listener and, with `cancel_active`, aborts its in-flight
    /// invocations.
    pub fn unsubscribe_with(&self, options: RemoveOptions) {
        if self.entry.unsubscribe() {
            tracing::debug!(listener_id = %self.entry.id, "listener unsubscribed");
        }
        if options.cancel_active {
            self.entry.cancel_active(None);
        }
    }

    pub fn listener_id(&self) -> Uuid {
        self.entry.id
    }
}

impl<E, S> Clone for Unsubscribe<E, S> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
        }
    }
}

impl<E, S> fmt::Debug for Unsubscribe<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("listener_id", &self.entry.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{effect, Descriptor};

    #[derive(Debug, Clone)]
    struct Tick(&'static str);

    impl Event for Tick {
        fn event_type(&self) -> &str {
            self.0
        }
    }

    fn noop() -> EffectRef<Tick, ()> {
        effect(|_: Tick, _| async { anyhow::Ok(()) })
    }

    #[test]
    fn identical_registration_is_deduplicated() {
        let registry = Registry::<Tick, ()>::new();
        let effect = noop();

        let (first, created) = registry.add(Listener::new("tick", effect.clone()));
        assert!(created);
        let (second, created) = registry.add(Listener::new("tick", effect.clone()));
        assert!(!created);

        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_descriptor_different_effect_is_distinct() {
        let registry = Registry::<Tick, ()>::new();
        registry.add(Listener::new("tick", noop()));
        registry.add(Listener::new("tick", noop()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_reports_whether_found() {
        let registry = Registry::<Tick, ()>::new();
        let listener = Listener::new("tick", noop());
        registry.add(listener.clone());

        assert!(registry.remove(&listener, RemoveOptions::default()));
        assert!(!registry.remove(&listener, RemoveOptions::default()));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_with_cancel_active_aborts_pending_scopes() {
        let registry = Registry::<Tick, ()>::new();
        let listener = Listener::new("tick", noop());
        let (entry, _) = registry.add(listener.clone());

        let first = Scope::new();
        let second = Scope::new();
        entry.add_pending(first.clone());
        entry.add_pending(second.clone());

        assert!(registry.remove(&listener, RemoveOptions::cancel_active()));
        assert_eq!(first.reason(), Some(AbortReason::ListenerCancelled));
        assert_eq!(second.reason(), Some(AbortReason::ListenerCancelled));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let registry = Registry::<Tick, ()>::new();
        let (a, _) = registry.add(Listener::new("a", noop()));
        let snapshot = registry.snapshot();

        a.unsubscribe();
        registry.add(Listener::new("b", noop()));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, a.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscribe_reinserts_removed_entry_once() {
        let registry = Registry::<Tick, ()>::new();
        let (entry, _) = registry.add(Listener::new("a", noop()));

        assert!(entry.unsubscribe());
        assert!(!entry.unsubscribe());
        assert!(entry.subscribe());
        assert!(!entry.subscribe());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_cancels_executing_entries_even_after_unsubscribe() {
        let registry = Registry::<Tick, ()>::new();
        let (entry, _) = registry.add(Listener::new("a", noop()));
        let scope = Scope::new();
        entry.add_pending(scope.clone());
        registry.track(&entry);

        entry.unsubscribe();
        registry.add(Listener::new(Descriptor::guard(|_: &Tick| true), noop()));

        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
        assert_eq!(scope.reason(), Some(AbortReason::ListenerCancelled));
    }

    #[test]
    fn executing_counter_tracks_overlapping_invocations() {
        let registry = Registry::<Tick, ()>::new();
        let (entry, _) = registry.add(Listener::new("a", noop()));

        registry.track(&entry);
        registry.track(&entry);
        assert_eq!(registry.executing_count(), 2);

        registry.untrack(&entry);
        registry.untrack(&entry);
        assert_eq!(registry.executing_count(), 0);
        registry.untrack(&entry);
        assert_eq!(registry.executing_count(), 0);
    }

    #[test]
    fn cancel_active_skips_own_scope() {
        let registry = Registry::<Tick, ()>::new();
        let (entry, _) = registry.add(Listener::new("a", noop()));
        let own = Scope::new();
        let sibling = Scope::new();
        entry.add_pending(own.clone());
        entry.add_pending(sibling.clone());

        assert_eq!(entry.cancel_active(Some(&own)), 1);
        assert!(!own.is_aborted());
        assert!(sibling.is_aborted());
    }
}
