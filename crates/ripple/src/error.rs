//! Error types.
//!
//! - [`Cancelled`] is the cooperative-stop signal. It is never reported to the
//!   error handler.
//! - [`ListenerError`] covers misuse of the listener API.
//! - [`ErrorInfo`] tags reported failures with the phase that raised them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scope::AbortReason;

/// Raised when work observes an aborted scope.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("task cancelled (reason: {reason})")]
pub struct Cancelled {
    reason: AbortReason,
}

impl Cancelled {
    pub fn new(reason: AbortReason) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> AbortReason {
        self.reason
    }

    /// True if `err` or anything in its cause chain is a [`Cancelled`].
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<Cancelled>())
    }

    /// Finds the [`Cancelled`] in `err`'s cause chain.
    pub fn find(err: &anyhow::Error) -> Option<Cancelled> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<Cancelled>())
            .copied()
    }
}

/// Misuse of the listener API.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// `get_original_state` was called after the submission that started the
    /// effect had returned.
    #[error("get_original_state can only be called synchronously")]
    OriginalStateUnavailable,

    /// A listener invocation suspended but no tokio runtime was available to
    /// continue it.
    #[error("no tokio runtime available to run listener effects")]
    NoRuntime,
}

/// Which phase of listener processing raised a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaisedBy {
    Effect,
    Predicate,
}

impl RaisedBy {
    pub fn as_label(&self) -> &'static str {
        match self {
            RaisedBy::Effect => "effect",
            RaisedBy::Predicate => "predicate",
        }
    }
}

impl fmt::Display for RaisedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Context passed to the error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub raised_by: RaisedBy,
}

/// Receives predicate and effect failures.
///
/// Handlers should not panic. If one does, the panic is re-raised on a fresh
/// tokio task rather than unwinding through the dispatch pass.
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error, ErrorInfo) + Send + Sync>;

/// Logs the failure with `tracing::error!`.
pub(crate) fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: &anyhow::Error, info: ErrorInfo| {
        tracing::error!(raised_by = %info.raised_by, error = ?err, "listener failed");
    })
}

/// Turns a caught panic payload into an error.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    anyhow::anyhow!("panicked: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn cancellation_is_found_through_context() {
        let err = anyhow::Error::new(Cancelled::new(AbortReason::TaskCancelled))
            .context("while waiting for upload");
        assert!(Cancelled::is_cancellation(&err));
        assert_eq!(
            Cancelled::find(&err).map(|c| c.reason()),
            Some(AbortReason::TaskCancelled)
        );
    }

    #[test]
    fn plain_errors_are_not_cancellation() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("boom")).context("outer");
        assert!(!Cancelled::is_cancellation(&err.unwrap_err()));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = panic_error(Box::new("bad predicate"));
        assert_eq!(err.to_string(), "panicked: bad predicate");

        let err = panic_error(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "panicked: owned");
    }

    #[test]
    fn error_info_serializes_phase() {
        let info = ErrorInfo {
            raised_by: RaisedBy::Predicate,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["raised_by"], "predicate");
    }
}
