//! Sans-IO session engine for the CLD coordination service.
//!
//! The engine turns an unreliable datagram transport into an ordered,
//! authenticated, at-most-once RPC channel: sequence-ID accounting with
//! a replay window, message fragmentation and reassembly, per-fragment
//! retransmission, and a pipeline of in-flight RPCs matched to
//! responses by transaction ID.
//!
//! Nothing here performs I/O or blocks. A driver owns the socket and
//! the clock: it feeds received datagrams to
//! [`Session::handle_packet`], calls [`Session::tick`] when
//! [`Session::next_deadline`] passes, transmits whatever
//! [`Session::take_outgoing`] returns, and drains
//! [`Session::poll_event`] *without holding its engine lock* before
//! invoking user event callbacks — an event callback may re-enter the
//! API, and running it under the lock would deadlock. The blocking
//! façade in `cld-client` is one such driver.
//!
//! The engine assumes exactly one execution context at a time; drivers
//! serialise access (a mutex, a single thread, an actor — their
//! choice).

pub mod config;
pub mod env;
pub mod error;
pub mod event;
pub mod handle;
pub mod hosts;
mod message;
pub mod session;
pub mod window;

pub use config::{Credentials, NotMasterPolicy, SessionConfig};
pub use env::Environment;
pub use error::EngineError;
pub use event::{Completion, Reply, SessionEvent};
pub use handle::FhId;
pub use hosts::{HostRecord, HostRing};
pub use session::{Session, SessionState};
pub use window::{SeqDecision, SeqWindow};
