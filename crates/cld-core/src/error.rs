//! Engine error types.
//!
//! Strongly-typed errors for the session engine, covering the full
//! taxonomy: fatal protocol defects, sequence violations, session-level
//! failures, and invalid arguments caught before anything touches the
//! wire. Server result codes are NOT errors here; they travel to the
//! caller inside the completion.

use thiserror::Error;

use cld_proto::ProtocolError;

/// Errors raised by session-engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or unauthenticated packet; dropped without side effects.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Inbound sequence ID outside the acceptance window; dropped, not
    /// acknowledged.
    #[error("sequence id {seqid} outside window ending at {next_in}")]
    SequenceViolation {
        /// Offending sequence ID.
        seqid: u64,
        /// The next expected inbound sequence ID.
        next_in: u64,
    },

    /// Packet arrived from an address other than the session's server.
    #[error("packet from unexpected address")]
    AddressMismatch,

    /// Operation requires a confirmed session.
    #[error("session not confirmed")]
    NotConfirmed,

    /// The session has expired; only teardown is possible.
    #[error("session expired")]
    SessionExpired,

    /// Operation invalid for the session's current state.
    #[error("invalid state: cannot {0} now")]
    InvalidState(&'static str),

    /// File handle unknown, not yet opened, or already closed.
    #[error("invalid file handle")]
    InvalidHandle,

    /// Path must start with `/` and fit the protocol's name limit.
    #[error("invalid path: {0}")]
    InvalidPath(&'static str),

    /// Payload rejected before issuance (empty or oversize).
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    /// User name or secret rejected at session construction.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    /// Host ring has no entries.
    #[error("no hosts available")]
    NoHosts,
}
