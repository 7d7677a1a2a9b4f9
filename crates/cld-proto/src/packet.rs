//! Packet header and whole-packet codec.
//!
//! Layout on the wire (little-endian):
//!
//! ```text
//! magic   : 8 bytes   "CLDv1cli" outbound, "CLDv1svr" inbound
//! sid     : 8 bytes   session identifier
//! user    : 1 + n     length-prefixed user name, n <= 31
//! order   : 1 byte    FIRST / MID / LAST / FIRST_LAST
//! xid     : 8 bytes   } present only when the FIRST bit is set
//! op      : 1 byte    }
//! body    : 0..=1024  contiguous slice of the message body
//! seqid   : 8 bytes   } footer
//! digest  : 20 bytes  } HMAC-SHA1 over everything above
//! ```
//!
//! The header is variable length, so parsing walks the buffer front to
//! back; the footer is fixed length and parsed from the tail. Digest
//! verification is separate (see [`crate::auth`]) so that a caller can
//! route on the header before paying for the MAC.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    DIGEST_LEN, FOOTER_LEN, MAX_PKT_BODY, MAX_USERNAME, SID_LEN,
    errors::{ProtocolError, Result},
    opcode::{Opcode, PktOrder},
};

/// Which side of the conversation a packet claims to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    /// Client-originated packet.
    Client,
    /// Server-originated packet.
    Server,
}

impl Magic {
    /// Magic length in bytes.
    pub const LEN: usize = 8;

    /// The wire constant for this side.
    #[must_use]
    pub fn as_bytes(self) -> &'static [u8; Self::LEN] {
        match self {
            Self::Client => b"CLDv1cli",
            Self::Server => b"CLDv1svr",
        }
    }

    fn from_bytes(b: &[u8]) -> Result<Self> {
        if b == Self::Client.as_bytes() {
            Ok(Self::Client)
        } else if b == Self::Server.as_bytes() {
            Ok(Self::Server)
        } else {
            Err(ProtocolError::BadMagic)
        }
    }
}

/// Message-info record: this packet's position within its message.
///
/// Only FIRST-bearing packets name the transaction and the op; the
/// variants make an XID-less FIRST or an XID-bearing MID unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgInfo {
    /// FIRST or FIRST_LAST: opens a message.
    Lead {
        /// True when this packet also completes the message (FIRST_LAST).
        last: bool,
        /// Transaction ID of the message.
        xid: u64,
        /// Operation the message carries.
        op: Opcode,
    },
    /// MID or LAST: continues the message opened by a preceding FIRST.
    Cont {
        /// True when this packet completes the message (LAST).
        last: bool,
    },
}

impl MsgInfo {
    /// The ORDER marker this record encodes to.
    #[must_use]
    pub fn order(self) -> PktOrder {
        match self {
            Self::Lead { last: true, .. } => PktOrder::FirstLast,
            Self::Lead { last: false, .. } => PktOrder::First,
            Self::Cont { last: true } => PktOrder::Last,
            Self::Cont { last: false } => PktOrder::Mid,
        }
    }

    /// Transaction ID, if this is a FIRST-bearing packet.
    #[must_use]
    pub fn xid(self) -> Option<u64> {
        match self {
            Self::Lead { xid, .. } => Some(xid),
            Self::Cont { .. } => None,
        }
    }

    /// Op code, if this is a FIRST-bearing packet.
    #[must_use]
    pub fn op(self) -> Option<Opcode> {
        match self {
            Self::Lead { op, .. } => Some(op),
            Self::Cont { .. } => None,
        }
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Session identifier.
    pub sid: [u8; SID_LEN],
    /// Authenticated user name, at most [`MAX_USERNAME`] bytes.
    pub user: String,
    /// Position of this packet within its message.
    pub info: MsgInfo,
}

impl PacketHeader {
    /// Encoded size of this header in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let info_len = match self.info {
            MsgInfo::Lead { .. } => 1 + 8 + 1,
            MsgInfo::Cont { .. } => 1,
        };
        Magic::LEN + SID_LEN + 1 + self.user.len() + info_len
    }

    /// Encode the header into `dst`, prefixed with `magic`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::BadUserLength` if the user name is empty or
    ///   longer than [`MAX_USERNAME`] bytes
    pub fn encode(&self, magic: Magic, dst: &mut BytesMut) -> Result<()> {
        if self.user.is_empty() || self.user.len() > MAX_USERNAME {
            return Err(ProtocolError::BadUserLength(self.user.len()));
        }

        dst.put_slice(magic.as_bytes());
        dst.put_slice(&self.sid);
        dst.put_u8(self.user.len() as u8);
        dst.put_slice(self.user.as_bytes());
        dst.put_u8(self.info.order().to_u8());
        if let MsgInfo::Lead { xid, op, .. } = self.info {
            dst.put_u64_le(xid);
            dst.put_u8(op.to_u8());
        }

        Ok(())
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Returns the magic, the header, and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Magic, Self, usize)> {
        let mut pos = 0usize;
        let need = |pos: usize, n: usize| -> Result<()> {
            if buf.len() < pos + n {
                Err(ProtocolError::Truncated { expected: pos + n, actual: buf.len() })
            } else {
                Ok(())
            }
        };

        need(pos, Magic::LEN)?;
        let magic = Magic::from_bytes(&buf[pos..pos + Magic::LEN])?;
        pos += Magic::LEN;

        need(pos, SID_LEN)?;
        let mut sid = [0u8; SID_LEN];
        sid.copy_from_slice(&buf[pos..pos + SID_LEN]);
        pos += SID_LEN;

        need(pos, 1)?;
        let user_len = buf[pos] as usize;
        pos += 1;
        if user_len == 0 || user_len > MAX_USERNAME {
            return Err(ProtocolError::BadUserLength(user_len));
        }
        need(pos, user_len)?;
        let user = std::str::from_utf8(&buf[pos..pos + user_len])
            .map_err(|_| ProtocolError::BadUserEncoding)?
            .to_owned();
        pos += user_len;

        need(pos, 1)?;
        let order = PktOrder::from_u8(buf[pos])?;
        pos += 1;

        let info = if order.is_first() {
            need(pos, 9)?;
            let mut xid_bytes = [0u8; 8];
            xid_bytes.copy_from_slice(&buf[pos..pos + 8]);
            let xid = u64::from_le_bytes(xid_bytes);
            pos += 8;
            let raw_op = buf[pos];
            pos += 1;
            let op = Opcode::from_u8(raw_op).ok_or(ProtocolError::UnknownOp(raw_op))?;
            MsgInfo::Lead { last: order.is_last(), xid, op }
        } else {
            MsgInfo::Cont { last: order.is_last() }
        };

        Ok((magic, Self { sid, user, info }, pos))
    }
}

/// A fully decoded wire packet.
///
/// Decoding validates structure only; the footer digest is NOT checked.
/// Callers must run [`crate::auth::verify_packet`] over the raw bytes
/// before trusting any field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Which side sent the packet, per its magic.
    pub magic: Magic,
    /// Decoded header.
    pub header: PacketHeader,
    /// Body fragment carried by this packet.
    pub body: Bytes,
    /// Footer sequence ID.
    pub seqid: u64,
    /// Footer HMAC-SHA1 digest (unverified).
    pub digest: [u8; DIGEST_LEN],
}

impl Packet {
    /// Decode a complete packet from raw datagram bytes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if the buffer cannot hold both a
    ///   header and a footer
    /// - `ProtocolError::BadMagic` / `UnknownOrder` / `UnknownOp` /
    ///   `BadUserLength` / `BadUserEncoding` for malformed header fields
    /// - `ProtocolError::TooLarge` if the body fragment exceeds
    ///   [`MAX_PKT_BODY`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FOOTER_LEN {
            return Err(ProtocolError::Truncated { expected: FOOTER_LEN, actual: bytes.len() });
        }

        let (magic, header, hdr_len) = PacketHeader::decode(bytes)?;

        let foot_at = bytes.len() - FOOTER_LEN;
        if hdr_len > foot_at {
            return Err(ProtocolError::Truncated {
                expected: hdr_len + FOOTER_LEN,
                actual: bytes.len(),
            });
        }

        let body_len = foot_at - hdr_len;
        if body_len > MAX_PKT_BODY {
            return Err(ProtocolError::TooLarge {
                what: "packet body",
                size: body_len,
                max: MAX_PKT_BODY,
            });
        }

        let mut seqid_bytes = [0u8; 8];
        seqid_bytes.copy_from_slice(&bytes[foot_at..foot_at + 8]);
        let seqid = u64::from_le_bytes(seqid_bytes);

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[foot_at + 8..]);

        Ok(Self {
            magic,
            header,
            body: Bytes::copy_from_slice(&bytes[hdr_len..foot_at]),
            seqid,
            digest,
        })
    }
}
