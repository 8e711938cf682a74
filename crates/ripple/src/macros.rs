//! Macros for reducing event boilerplate.

/// Implement [`Event`](crate::Event) for an enum by mapping each variant to
/// its type string.
///
/// Works for unit, tuple and struct variants.
///
/// # Example
///
/// ```
/// use ripple::{event_types, Event};
///
/// #[derive(Debug, Clone)]
/// enum CounterEvent {
///     Incremented,
///     AddedBy(u32),
///     Reset { to: u32 },
/// }
///
/// event_types!(CounterEvent {
///     Incremented => "counter/incremented",
///     AddedBy => "counter/addedBy",
///     Reset => "counter/reset",
/// });
///
/// assert_eq!(CounterEvent::AddedBy(2).event_type(), "counter/addedBy");
/// ```
#[macro_export]
macro_rules! event_types {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $crate::Event for $ty {
            fn event_type(&self) -> &str {
                match self {
                    $( $ty::$variant { .. } => $name, )+
                }
            }
        }
    };
}
