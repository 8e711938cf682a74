//! Core traits and the submission unit.

use std::borrow::Cow;
use std::fmt;

use crate::descriptor::Listener;
use crate::registry::RemoveOptions;

/// Type namespace reserved for control actions.
pub const CONTROL_PREFIX: &str = "ripple/";

/// Type reported by [`Action::AddListener`].
pub const ADD_LISTENER_TYPE: &str = "ripple/add";
/// Type reported by [`Action::RemoveListener`].
pub const REMOVE_LISTENER_TYPE: &str = "ripple/remove";
/// Type reported by [`Action::ClearAll`].
pub const CLEAR_ALL_TYPE: &str = "ripple/clearAll";

/// Events are opaque facts carrying a discriminant type string.
///
/// Use [`event_types!`](crate::event_types) to implement this for an enum.
pub trait Event: Clone + Send + Sync + 'static {
    fn event_type(&self) -> &str;
}

/// Host state snapshots. Auto-implemented for any cloneable, shareable type.
pub trait State: Clone + Send + Sync + 'static {}

impl<T> State for T where T: Clone + Send + Sync + 'static {}

/// A unit submitted through the host pipeline.
///
/// Domain events travel as [`Action::Event`]. The remaining variants are
/// control actions consumed by the interceptor itself; they never reach
/// listeners or the rest of the pipeline.
pub enum Action<E, S> {
    Event(E),
    AddListener(Listener<E, S>),
    RemoveListener(Listener<E, S>, RemoveOptions),
    ClearAll,
}

impl<E: Event, S> Action<E, S> {
    /// The discriminant type. Control actions report `ripple/*` types.
    pub fn action_type(&self) -> Cow<'_, str> {
        match self {
            Action::Event(event) => Cow::Borrowed(event.event_type()),
            Action::AddListener(_) => Cow::Borrowed(ADD_LISTENER_TYPE),
            Action::RemoveListener(..) => Cow::Borrowed(REMOVE_LISTENER_TYPE),
            Action::ClearAll => Cow::Borrowed(CLEAR_ALL_TYPE),
        }
    }

    pub fn is_control(&self) -> bool {
        !matches!(self, Action::Event(_))
    }
}

impl<E, S> From<E> for Action<E, S>
where
    E: Event,
{
    fn from(event: E) -> Self {
        Action::Event(event)
    }
}

impl<E: Event + fmt::Debug, S> fmt::Debug for Action<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Action::AddListener(listener) => {
                f.debug_tuple("AddListener").field(listener).finish()
            }
            Action::RemoveListener(listener, options) => f
                .debug_tuple("RemoveListener")
                .field(listener)
                .field(options)
                .finish(),
            Action::ClearAll => f.write_str("ClearAll"),
        }
    }
}
