//! # Error types produced by the supervisor runtime.
//!
//! Two layers:
//!
//! - Sentinel variants of [`Error`] for conditions the machine detects itself
//!   (unexpected process exit, startup/shutdown timeouts, canceled health
//!   waits, health registration conflicts).
//! - [`OpError`] for a lifecycle operation that terminated abnormally. It
//!   carries the component name, the operation, whether it failed or timed
//!   out, and the user error (reachable through [`std::error::Error::source`]).
//!
//! Cooperative cancellation is modeled by the [`Canceled`] marker: an error
//! whose source chain contains `Canceled` is treated as a clean exit when the
//! component's context was canceled by the supervisor.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error type returned by user lifecycle hooks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Marker error a hook may return (or wrap) to signal that it exited because
/// its context was canceled. Laundered by the supervisor instead of being
/// reported.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("operation canceled")]
pub struct Canceled;

/// Errors emitted on the supervisor's output stream.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A process returned from `run` before stop was requested and the
    /// component was not marked with early exit.
    #[error("unexpected return from process")]
    UnexpectedReturn,

    /// The health keys associated with a process did not report healthy
    /// within the configured startup timeout.
    #[error("process did not become healthy within timeout")]
    StartupTimeout,

    /// A process did not return from `run` after a stop request within the
    /// configured shutdown timeout.
    #[error("process refusing to shut down; abandoning task")]
    ShutdownTimeout,

    /// A priority group's health wait was aborted because another process
    /// exited in a non-healthy way.
    #[error("health check canceled")]
    HealthCheckCanceled,

    /// A health component was registered under an already-taken key.
    #[error("health component already registered")]
    HealthComponentAlreadyRegistered,

    /// A health lookup referenced a key that was never registered.
    #[error("health component {0:?} not registered")]
    HealthComponentNotRegistered(String),

    /// A lifecycle operation failed or timed out.
    #[error(transparent)]
    Op(#[from] OpError),
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::UnexpectedReturn => "unexpected_return",
            Error::StartupTimeout => "startup_timeout",
            Error::ShutdownTimeout => "shutdown_timeout",
            Error::HealthCheckCanceled => "health_check_canceled",
            Error::HealthComponentAlreadyRegistered => "health_already_registered",
            Error::HealthComponentNotRegistered(_) => "health_not_registered",
            Error::Op(op) => match op.kind() {
                OpErrorKind::Failed => "op_failed",
                OpErrorKind::Timeout => "op_timeout",
            },
        }
    }
}

/// Lifecycle operations a component moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Inject,
    Init,
    Run,
    Stop,
    Finalize,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Inject => "inject hook",
            Op::Init => "init",
            Op::Run => "run",
            Op::Stop => "stop",
            Op::Finalize => "finalize",
        })
    }
}

/// How a lifecycle operation terminated abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpErrorKind {
    /// The user hook returned an error.
    Failed,
    /// The operation's timer elapsed before the hook returned.
    Timeout,
}

impl fmt::Display for OpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpErrorKind::Failed => "failed",
            OpErrorKind::Timeout => "timeout",
        })
    }
}

/// An abnormal termination of a single component's lifecycle operation.
///
/// Renders as `"<component>: <op> <kind> (<cause>)"`, omitting the
/// parenthetical when there is no underlying cause.
#[derive(Debug)]
pub struct OpError {
    component: String,
    op: Op,
    kind: OpErrorKind,
    cause: Option<BoxError>,
}

impl OpError {
    pub(crate) fn failed(component: impl Into<String>, op: Op, cause: BoxError) -> Self {
        Self {
            component: component.into(),
            op,
            kind: OpErrorKind::Failed,
            cause: Some(cause),
        }
    }

    pub(crate) fn timeout(component: impl Into<String>, op: Op) -> Self {
        Self {
            component: component.into(),
            op,
            kind: OpErrorKind::Timeout,
            cause: None,
        }
    }

    /// Name of the component the operation belonged to.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The operation that terminated abnormally.
    pub fn op(&self) -> Op {
        self.op
    }

    /// Whether the operation failed or timed out.
    pub fn kind(&self) -> OpErrorKind {
        self.kind
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.component, self.op, self.kind)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

impl StdError for OpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

/// Returns true if the given error's source chain contains the [`Canceled`]
/// marker.
pub(crate) fn is_canceled(err: &Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<Canceled>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_error_display_includes_cause() {
        let err = OpError::failed("gateway", Op::Init, "boom".into());
        assert_eq!(err.to_string(), "gateway: init failed (boom)");
    }

    #[test]
    fn op_error_display_without_cause() {
        let err = OpError::timeout("gateway", Op::Stop);
        assert_eq!(err.to_string(), "gateway: stop timeout");
    }

    #[test]
    fn inject_op_renders_as_inject_hook() {
        let err = OpError::failed("gateway", Op::Inject, "nope".into());
        assert_eq!(err.to_string(), "gateway: inject hook failed (nope)");
    }

    #[test]
    fn canceled_is_found_through_the_source_chain() {
        let wrapped = OpError::failed("gateway", Op::Run, Box::new(Canceled));
        assert!(is_canceled(&Error::Op(wrapped)));
        assert!(!is_canceled(&Error::UnexpectedReturn));

        let plain = OpError::failed("gateway", Op::Run, "boom".into());
        assert!(!is_canceled(&Error::Op(plain)));
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(Error::UnexpectedReturn.as_label(), "unexpected_return");
        let timeout = Error::Op(OpError::timeout("gateway", Op::Init));
        assert_eq!(timeout.as_label(), "op_timeout");
    }
}
