//! Blocking client for the CLD coordination service.
//!
//! This crate turns the sans-IO engine in `cld-core` into something an
//! application can call directly: a [`BlockingSession`] with a
//! dedicated I/O thread, blocking `open`/`get`/`put`/`del`/lock
//! wrappers, and two concrete transports (UDP datagrams, or the same
//! packets length-prefixed over TCP).
//!
//! ```no_run
//! use cld_client::{BlockingSession, TransportKind};
//! use cld_core::{Credentials, HostRing, SessionConfig};
//! use cld_proto::{EventMask, OpenMode};
//!
//! # fn main() -> Result<(), cld_client::ClientError> {
//! let sess = BlockingSession::connect(
//!     HostRing::single("127.0.0.1", 8081),
//!     &Credentials::new("alice", b"pw".to_vec()),
//!     &SessionConfig::default(),
//!     TransportKind::Udp,
//!     None,
//! )?;
//!
//! let fh = sess.open(
//!     "/foo",
//!     OpenMode::CREATE | OpenMode::WRITE | OpenMode::READ,
//!     EventMask::default(),
//!     None,
//! )?;
//! fh.put(b"hello")?;
//! let (meta, data) = fh.get()?;
//! assert_eq!(&data[..], b"hello");
//! assert_eq!(meta.version, 1);
//! fh.close()?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod env;
pub mod error;
pub mod transport;

pub use blocking::{
    BlockingHandle, BlockingSession, HandleEventFn, LockStatus, SessionEventFn, TransportKind,
};
pub use env::SystemEnv;
pub use error::ClientError;
pub use transport::{TcpTransport, Transport, UdpTransport};
