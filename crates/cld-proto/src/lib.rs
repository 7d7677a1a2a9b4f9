//! Wire format for the CLD coordination-service protocol, client view.
//!
//! A CLD packet is `header ‖ body-fragment ‖ footer`. The header is a
//! variable-length binary record (magic, session ID, user name, message
//! info); the footer is a little-endian sequence ID followed by an
//! HMAC-SHA1 digest keyed by the user's secret. Logical messages larger
//! than one packet are split across several, marked FIRST/MID/LAST.
//!
//! This crate is pure data: encoding, decoding, and signing. Session
//! state, retransmission, and sequence-ID accounting live in `cld-core`.

pub mod auth;
pub mod codes;
pub mod dirent;
pub mod errors;
pub mod messages;
pub mod opcode;
pub mod packet;

pub use auth::{sign_packet, verify_packet};
pub use codes::{EventMask, LockFlags, OpenMode, ResultCode};
pub use dirent::{DirentIter, append_dirent, dirent_count};
pub use errors::{ProtocolError, Result};
pub use opcode::{Opcode, PktOrder};
pub use packet::{Magic, MsgInfo, Packet, PacketHeader};

/// Session identifier length in bytes.
pub const SID_LEN: usize = 8;

/// SHA-1 digest length in bytes.
pub const DIGEST_LEN: usize = 20;

/// Packet footer length: 8-byte LE sequence ID plus the HMAC-SHA1 digest.
pub const FOOTER_LEN: usize = 8 + DIGEST_LEN;

/// Maximum user-name length in bytes (excluding any terminator).
pub const MAX_USERNAME: usize = 31;

/// Maximum body bytes carried by a single packet.
pub const MAX_PKT_BODY: usize = 1024;

/// Maximum reassembled message size.
pub const MAX_MSG_SIZE: usize = 128 * 1024;

/// Maximum inode path length accepted by OPEN and DEL.
pub const MAX_INODE_NAME: usize = 256;

/// Maximum data size accepted by a single PUT.
pub const MAX_PAYLOAD: usize = 64 * 1024;
