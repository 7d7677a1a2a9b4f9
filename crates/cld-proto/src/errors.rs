//! Protocol-level error types.
//!
//! Everything here describes a defect in bytes received from (or about to
//! be sent to) the wire. Session-level failures (expiry, timeouts) are
//! modelled in `cld-core`, not here.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding, decoding, or authenticating packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for the structure being parsed.
    #[error("packet truncated: need {expected} bytes, have {actual}")]
    Truncated {
        /// Bytes required to continue parsing.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Leading magic matched neither the client nor the server constant.
    #[error("bad packet magic")]
    BadMagic,

    /// Op code byte outside the known set.
    #[error("unknown op code {0:#04x}")]
    UnknownOp(u8),

    /// Order byte outside {FIRST, MID, LAST, FIRST_LAST}.
    #[error("unknown packet order {0:#04x}")]
    UnknownOrder(u8),

    /// Result code outside the known set.
    #[error("unknown result code {0}")]
    UnknownCode(u32),

    /// Footer HMAC did not verify against the shared secret.
    #[error("packet authentication failed")]
    AuthFailed,

    /// User name exceeds [`crate::MAX_USERNAME`] or is empty.
    #[error("invalid user name length {0}")]
    BadUserLength(usize),

    /// User name bytes are not valid UTF-8.
    #[error("user name is not valid UTF-8")]
    BadUserEncoding,

    /// A length-prefixed field claims more bytes than remain.
    #[error("malformed {0} field")]
    Malformed(&'static str),

    /// Body or payload exceeds a protocol limit.
    #[error("{what} too large: {size} bytes (max {max})")]
    TooLarge {
        /// Which limit was exceeded.
        what: &'static str,
        /// Offending size.
        size: usize,
        /// The limit.
        max: usize,
    },
}
