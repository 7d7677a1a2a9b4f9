//! Completion and event types delivered by the engine.

use bytes::Bytes;
use cld_proto::{EventMask, ResultCode, messages::NodeMetadata};

use crate::handle::FhId;

/// Decoded response payload handed to an RPC completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// No payload beyond the result code.
    None,
    /// OPEN succeeded; the server-issued handle ID.
    Open {
        /// Server-issued 64-bit handle.
        fh: u64,
    },
    /// GET / GET_META payload, copied out of the reassembly buffer.
    Get {
        /// Inode metadata.
        meta: NodeMetadata,
        /// File contents; `None` for GET_META.
        data: Option<Bytes>,
    },
}

/// Per-RPC completion callback.
///
/// Invoked exactly once: with the server's result code when a response
/// arrives, or with [`ResultCode::Timeout`] when the message or session
/// expires first. Runs on the engine's thread of control; must not call
/// back into the session.
pub type Completion = Box<dyn FnOnce(ResultCode, Reply) + Send>;

/// Events posted by the engine into its bounded queue.
///
/// The engine never invokes user code for these; a driver drains them
/// via [`crate::Session::poll_event`] with no engine lock held, so an
/// event callback may freely re-enter the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session expired or was failed; every outstanding RPC has
    /// already been completed with a timeout.
    SessFailed,
    /// The server reported it is no longer the master.
    NotMaster,
    /// Server-pushed event for one open handle.
    Handle {
        /// The local handle the event applies to.
        fh: FhId,
        /// Conditions being reported.
        events: EventMask,
    },
}
