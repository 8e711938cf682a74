//! Listener descriptors and effects.
//!
//! A listener is a `(descriptor, effect)` pair. Descriptors come in four
//! shapes and are normalized at registration into a single predicate plus an
//! identity key used for deduplication and removal.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::ListenerApi;
use crate::core::{Event, State};

/// Normalized listener predicate: `(event, state_after, state_before)`.
pub type PredicateFn<E, S> = Arc<dyn Fn(&E, &S, &S) -> bool + Send + Sync>;

/// Event-only type guard.
pub type GuardFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Objects that recognize events, e.g. typed event constructors.
pub trait EventMatcher<E>: Send + Sync {
    fn matches(&self, event: &E) -> bool;
}

/// What a listener reacts to. Exactly one variant per listener.
pub enum Descriptor<E, S> {
    /// Exact event type string.
    Type(Cow<'static, str>),
    /// Type guard over the event alone.
    Guard(GuardFn<E>),
    /// Boolean predicate over the event and the before/after states.
    Predicate(PredicateFn<E, S>),
    /// Matcher object.
    Matcher(Arc<dyn EventMatcher<E>>),
}

impl<E, S> Descriptor<E, S> {
    pub fn event_type(event_type: impl Into<Cow<'static, str>>) -> Self {
        Descriptor::Type(event_type.into())
    }

    pub fn guard<F>(guard: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Descriptor::Guard(Arc::new(guard))
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&E, &S, &S) -> bool + Send + Sync + 'static,
    {
        Descriptor::Predicate(Arc::new(predicate))
    }

    pub fn matcher(matcher: Arc<dyn EventMatcher<E>>) -> Self {
        Descriptor::Matcher(matcher)
    }
}

impl<E: Event, S: State> Descriptor<E, S> {
    /// Collapses the descriptor into its identity key and predicate.
    pub(crate) fn normalize(&self) -> (DescriptorKey, PredicateFn<E, S>) {
        match self {
            Descriptor::Type(ty) => {
                let expected = ty.clone();
                let predicate: PredicateFn<E, S> =
                    Arc::new(move |event: &E, _: &S, _: &S| event.event_type() == expected);
                (DescriptorKey::Type(ty.clone()), predicate)
            }
            Descriptor::Guard(guard) => {
                let key = DescriptorKey::Func(addr_of(guard));
                let guard = guard.clone();
                (key, Arc::new(move |event: &E, _: &S, _: &S| guard(event)))
            }
            Descriptor::Predicate(predicate) => {
                (DescriptorKey::Func(addr_of(predicate)), predicate.clone())
            }
            Descriptor::Matcher(matcher) => {
                let key = DescriptorKey::Func(addr_of(matcher));
                let matcher = matcher.clone();
                (
                    key,
                    Arc::new(move |event: &E, _: &S, _: &S| matcher.matches(event)),
                )
            }
        }
    }
}

impl<E, S> Clone for Descriptor<E, S> {
    fn clone(&self) -> Self {
        match self {
            Descriptor::Type(ty) => Descriptor::Type(ty.clone()),
            Descriptor::Guard(guard) => Descriptor::Guard(guard.clone()),
            Descriptor::Predicate(predicate) => Descriptor::Predicate(predicate.clone()),
            Descriptor::Matcher(matcher) => Descriptor::Matcher(matcher.clone()),
        }
    }
}

impl<E, S> fmt::Debug for Descriptor<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Type(ty) => f.debug_tuple("Type").field(ty).finish(),
            Descriptor::Guard(_) => f.write_str("Guard(..)"),
            Descriptor::Predicate(_) => f.write_str("Predicate(..)"),
            Descriptor::Matcher(_) => f.write_str("Matcher(..)"),
        }
    }
}

impl<E, S> From<&'static str> for Descriptor<E, S> {
    fn from(event_type: &'static str) -> Self {
        Descriptor::Type(Cow::Borrowed(event_type))
    }
}

impl<E, S> From<String> for Descriptor<E, S> {
    fn from(event_type: String) -> Self {
        Descriptor::Type(Cow::Owned(event_type))
    }
}

/// Identity of a descriptor: the type string, or the address of the
/// closure/matcher behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DescriptorKey {
    Type(Cow<'static, str>),
    Func(usize),
}

fn addr_of<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

/// Side-effect run when a listener's descriptor matches.
///
/// Closures `Fn(E, ListenerApi<E, S>) -> impl Future<Output = anyhow::Result<()>>`
/// implement this automatically.
#[async_trait]
pub trait Effect<E, S>: Send + Sync + 'static {
    async fn run(&self, event: E, api: ListenerApi<E, S>) -> anyhow::Result<()>;
}

#[async_trait]
impl<E, S, F, Fut> Effect<E, S> for F
where
    E: Event,
    S: State,
    F: Fn(E, ListenerApi<E, S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, event: E, api: ListenerApi<E, S>) -> anyhow::Result<()> {
        (self)(event, api).await
    }
}

/// Shared effect handle. Removal and deduplication compare handles by
/// identity, so keep the `Arc` you registered.
pub type EffectRef<E, S> = Arc<dyn Effect<E, S>>;

pub(crate) fn effect_addr<E, S>(effect: &EffectRef<E, S>) -> usize {
    addr_of(effect)
}

/// A `(descriptor, effect)` pair ready to be registered or removed.
pub struct Listener<E, S> {
    pub descriptor: Descriptor<E, S>,
    pub effect: EffectRef<E, S>,
}

impl<E, S> Listener<E, S> {
    pub fn new(descriptor: impl Into<Descriptor<E, S>>, effect: EffectRef<E, S>) -> Self {
        Self {
            descriptor: descriptor.into(),
            effect,
        }
    }
}

impl<E, S> Clone for Listener<E, S> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            effect: self.effect.clone(),
        }
    }
}

impl<E, S> fmt::Debug for Listener<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Wraps an effect closure into an [`EffectRef`].
pub fn effect<E, S, F, Fut>(f: F) -> EffectRef<E, S>
where
    E: Event,
    S: State,
    F: Fn(E, ListenerApi<E, S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Ping(&'static str);

    impl Event for Ping {
        fn event_type(&self) -> &str {
            self.0
        }
    }

    struct StartsWith(&'static str);

    impl EventMatcher<Ping> for StartsWith {
        fn matches(&self, event: &Ping) -> bool {
            event.0.starts_with(self.0)
        }
    }

    #[test]
    fn type_descriptor_matches_exact_type() {
        let (key, predicate) = Descriptor::<Ping, u32>::event_type("ping").normalize();
        assert_eq!(key, DescriptorKey::Type("ping".into()));
        assert!(predicate(&Ping("ping"), &0, &0));
        assert!(!predicate(&Ping("pong"), &0, &0));
    }

    #[test]
    fn predicate_sees_both_states() {
        let descriptor =
            Descriptor::<Ping, u32>::predicate(|_, after: &u32, before: &u32| after > before);
        let (_, predicate) = descriptor.normalize();
        assert!(predicate(&Ping("any"), &2, &1));
        assert!(!predicate(&Ping("any"), &1, &1));
    }

    #[test]
    fn guard_and_matcher_ignore_state() {
        let (_, guard) =
            Descriptor::<Ping, u32>::guard(|event: &Ping| event.0.len() == 4).normalize();
        assert!(guard(&Ping("ping"), &0, &9));

        let (_, matcher) =
            Descriptor::<Ping, u32>::matcher(Arc::new(StartsWith("user/"))).normalize();
        assert!(matcher(&Ping("user/login"), &0, &0));
        assert!(!matcher(&Ping("admin/login"), &0, &0));
    }

    #[test]
    fn cloned_closure_descriptors_share_identity() {
        let descriptor = Descriptor::<Ping, u32>::guard(|_: &Ping| true);
        let (a, _) = descriptor.normalize();
        let (b, _) = descriptor.clone().normalize();
        assert_eq!(a, b);

        let (other, _) = Descriptor::<Ping, u32>::guard(|_: &Ping| true).normalize();
        assert_ne!(a, other);
    }
}
