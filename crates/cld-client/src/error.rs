//! Client-facing error type.

use std::io;

use thiserror::Error;

use cld_core::EngineError;
use cld_proto::ResultCode;

/// Errors surfaced by the blocking façade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected by the engine before reaching the wire.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Transport failure; the RPC (if any) stays queued for retry.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The server answered with a non-OK result code, or the RPC timed
    /// out ([`ResultCode::Timeout`], which also means the session is
    /// gone).
    #[error("server error: {0}")]
    Rpc(ResultCode),

    /// The handle is being closed; no new I/O is accepted.
    #[error("handle is closing")]
    HandleClosing,

    /// Could not establish a session with any discovered host.
    #[error("no server reachable: {0}")]
    NoServer(String),
}

impl ClientError {
    /// Fold a server result code into a `Result`.
    pub(crate) fn check(code: ResultCode) -> Result<(), Self> {
        if code.is_ok() { Ok(()) } else { Err(Self::Rpc(code)) }
    }
}
