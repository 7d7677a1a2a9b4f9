//! Op codes and per-packet position markers.

use crate::errors::{ProtocolError, Result};

/// Message operation code.
///
/// Carried in the header of FIRST-bearing packets only; continuation
/// packets inherit the op of the message they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No-op; liveness probe.
    Nop = 0,
    /// Establish a new session.
    NewSess = 1,
    /// Tear down the session.
    EndSess = 2,
    /// Open a file, returning a handle.
    Open = 3,
    /// Fetch metadata only.
    GetMeta = 4,
    /// Fetch metadata and data.
    Get = 5,
    /// Write data through a handle.
    Put = 6,
    /// Close a handle.
    Close = 7,
    /// Delete a file by path.
    Del = 8,
    /// Acquire a lock, waiting if contended.
    Lock = 9,
    /// Release a lock.
    Unlock = 10,
    /// Acquire a lock, failing if contended.
    Trylock = 11,
    /// Acknowledge receipt of a sequence ID (either direction).
    Ack = 12,
    /// Server liveness probe.
    Ping = 13,
    /// Server is not the active master.
    NotMaster = 14,
    /// Server-pushed handle event.
    Event = 15,
    /// Server acknowledgement of a single outbound fragment.
    AckFrag = 16,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Nop),
            1 => Some(Self::NewSess),
            2 => Some(Self::EndSess),
            3 => Some(Self::Open),
            4 => Some(Self::GetMeta),
            5 => Some(Self::Get),
            6 => Some(Self::Put),
            7 => Some(Self::Close),
            8 => Some(Self::Del),
            9 => Some(Self::Lock),
            10 => Some(Self::Unlock),
            11 => Some(Self::Trylock),
            12 => Some(Self::Ack),
            13 => Some(Self::Ping),
            14 => Some(Self::NotMaster),
            15 => Some(Self::Event),
            16 => Some(Self::AckFrag),
            _ => None,
        }
    }

    /// Control ops are consumed by the session engine itself and never
    /// dispatched to an in-flight RPC.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Ack | Self::Ping | Self::NotMaster | Self::Event | Self::AckFrag)
    }
}

/// Position of one packet within its logical message.
///
/// FIRST and LAST are bit flags; a single-packet message carries both.
/// Continuation packets in the middle of a message carry neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PktOrder {
    /// Interior fragment.
    Mid = 0,
    /// First fragment of a multi-packet message.
    First = 1,
    /// Final fragment of a multi-packet message.
    Last = 2,
    /// Sole fragment of a single-packet message.
    FirstLast = 3,
}

impl PktOrder {
    const FIRST_BIT: u8 = 1;
    const LAST_BIT: u8 = 2;

    /// Raw wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value.
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Mid),
            1 => Ok(Self::First),
            2 => Ok(Self::Last),
            3 => Ok(Self::FirstLast),
            other => Err(ProtocolError::UnknownOrder(other)),
        }
    }

    /// True for FIRST and FIRST_LAST: this packet begins a message and
    /// its header carries the XID and op.
    #[must_use]
    pub fn is_first(self) -> bool {
        self.to_u8() & Self::FIRST_BIT != 0
    }

    /// True for LAST and FIRST_LAST: this packet completes a message.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.to_u8() & Self::LAST_BIT != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for v in 0..=16u8 {
            let op = Opcode::from_u8(v).unwrap();
            assert_eq!(op.to_u8(), v);
        }
        assert_eq!(Opcode::from_u8(17), None);
        assert_eq!(Opcode::from_u8(0xff), None);
    }

    #[test]
    fn control_ops() {
        assert!(Opcode::Ack.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::NotMaster.is_control());
        assert!(Opcode::Event.is_control());
        assert!(Opcode::AckFrag.is_control());
        assert!(!Opcode::Open.is_control());
        assert!(!Opcode::NewSess.is_control());
    }

    #[test]
    fn order_bits() {
        assert!(PktOrder::First.is_first());
        assert!(!PktOrder::First.is_last());
        assert!(PktOrder::Last.is_last());
        assert!(!PktOrder::Last.is_first());
        assert!(PktOrder::FirstLast.is_first());
        assert!(PktOrder::FirstLast.is_last());
        assert!(!PktOrder::Mid.is_first());
        assert!(!PktOrder::Mid.is_last());
    }

    #[test]
    fn order_rejects_unknown() {
        assert_eq!(PktOrder::from_u8(4), Err(ProtocolError::UnknownOrder(4)));
    }
}
