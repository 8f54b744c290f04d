//! Error types for the group communication core.
//!
//! Transient conditions (`Again`, `Interrupted`, `DonorUnavailable`) are the
//! caller's business to retry. View changes are not errors; they surface as
//! CONF actions and only fail those in-flight operations whose semantics
//! depend on the view.

use crate::core::seqno::Seqno;
use thiserror::Error;

/// Error conditions surfaced by the core.
#[derive(Debug, Error)]
pub enum GcsError {
    /// Connection is not open, or the group is not in a primary
    /// configuration for an operation that requires one.
    #[error("not connected to a primary configuration")]
    NotConnected,

    /// The operation conflicts with an operation already in flight
    /// (e.g. `init` after `open`, a second state-transfer request).
    #[error("busy: {0}")]
    Busy(&'static str),

    /// The connection is in the wrong state for this operation.
    #[error("bad state for operation: {0}")]
    BadState(&'static str),

    /// Transient capacity condition; safe to retry after some releases.
    #[error("resource temporarily unavailable")]
    Again,

    /// The waiter at this seqno was cancelled; the seqno is skipped and
    /// successors do not wait for it. Terminal for this seqno.
    #[error("waiter for seqno {0} was cancelled")]
    Canceled(Seqno),

    /// The waiter at this seqno was interrupted. The seqno remains pending
    /// and must be grabbed again or self-cancelled.
    #[error("wait for seqno {0} was interrupted")]
    Interrupted(Seqno),

    /// The seqno is already past the released cursor, or otherwise outside
    /// the operable window.
    #[error("seqno {0} is out of range")]
    OutOfRange(Seqno),

    /// An in-flight replication or state-transfer request lost its view
    /// before delivery; the action was discarded.
    #[error("configuration changed before delivery")]
    ViewLost,

    /// No eligible state-transfer donor exists at this moment. Carries the
    /// local seqno the ordered request consumed, which the caller must
    /// still skip.
    #[error("no eligible state transfer donor (skip local seqno {local_seqno})")]
    DonorUnavailable { local_seqno: Seqno },

    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// Backend URL could not be parsed.
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),

    /// The URL scheme is recognized but the transport driver is not
    /// available in this build.
    #[error("backend driver unavailable: {0}")]
    BackendUnavailable(&'static str),

    /// The URL scheme is not one of dummy, spread, gcomm.
    #[error("unsupported backend scheme: {0}")]
    UnsupportedScheme(String),

    /// The transport violated its ordering contract (duplicate or
    /// out-of-order fragment within a sender's stream).
    #[error("transport protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid argument or payload shape.
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GcsError {
    /// Whether the condition is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Again | Self::Interrupted(_) | Self::DonorUnavailable { .. }
        )
    }

    /// Whether the condition is terminal for the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result type using [`GcsError`].
pub type GcsResult<T> = Result<T, GcsError>;
