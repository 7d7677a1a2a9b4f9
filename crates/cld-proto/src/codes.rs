//! Result codes and bitmask types shared between requests and responses.

use std::fmt;
use std::ops::BitOr;

use crate::errors::{ProtocolError, Result};

/// Server result code, echoed in every response.
///
/// `Timeout` never crosses the wire; the client synthesises it when a
/// session or message expires before a response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultCode {
    /// Success.
    Ok = 0,
    /// Client already exists.
    CliExists = 1,
    /// Client does not exist.
    CliInval = 2,
    /// Server database error.
    DbErr = 3,
    /// Invalid or corrupted packet.
    BadPkt = 4,
    /// Inode does not exist.
    InodeInval = 5,
    /// Inode name invalid.
    NameInval = 6,
    /// Server out of memory.
    Oom = 7,
    /// File handle invalid.
    FhInval = 8,
    /// Invalid data payload.
    DataInval = 9,
    /// Invalid lock operation.
    LockInval = 10,
    /// A conflicting lock is held.
    LockConflict = 11,
    /// Lock queued, waiting to be acquired.
    LockPending = 12,
    /// Operation incompatible with the file's open mode.
    ModeInval = 13,
    /// Inode already exists.
    InodeExists = 14,
    /// Client-synthesised: no response before expiry.
    Timeout = 15,
}

impl ResultCode {
    /// Raw wire value.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value.
    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Self::Ok),
            1 => Ok(Self::CliExists),
            2 => Ok(Self::CliInval),
            3 => Ok(Self::DbErr),
            4 => Ok(Self::BadPkt),
            5 => Ok(Self::InodeInval),
            6 => Ok(Self::NameInval),
            7 => Ok(Self::Oom),
            8 => Ok(Self::FhInval),
            9 => Ok(Self::DataInval),
            10 => Ok(Self::LockInval),
            11 => Ok(Self::LockConflict),
            12 => Ok(Self::LockPending),
            13 => Ok(Self::ModeInval),
            14 => Ok(Self::InodeExists),
            15 => Ok(Self::Timeout),
            other => Err(ProtocolError::UnknownCode(other)),
        }
    }

    /// True only for [`ResultCode::Ok`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::CliExists => "client exists",
            Self::CliInval => "client invalid",
            Self::DbErr => "database error",
            Self::BadPkt => "bad packet",
            Self::InodeInval => "inode invalid",
            Self::NameInval => "name invalid",
            Self::Oom => "out of memory",
            Self::FhInval => "file handle invalid",
            Self::DataInval => "data invalid",
            Self::LockInval => "lock invalid",
            Self::LockConflict => "lock conflict",
            Self::LockPending => "lock pending",
            Self::ModeInval => "mode invalid",
            Self::InodeExists => "inode exists",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Open-mode bitmask passed to OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode(u32);

impl OpenMode {
    /// Read access.
    pub const READ: Self = Self(1 << 0);
    /// Write access.
    pub const WRITE: Self = Self(1 << 1);
    /// Lock operations permitted.
    pub const LOCK: Self = Self(1 << 2);
    /// ACL updates permitted.
    pub const ACL: Self = Self(1 << 3);
    /// Create the file if it does not exist.
    pub const CREATE: Self = Self(1 << 4);
    /// With CREATE: fail if the file already exists.
    pub const EXCL: Self = Self(1 << 5);
    /// Open a directory inode.
    pub const DIRECTORY: Self = Self(1 << 6);

    /// Raw bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Construct from raw bits; unknown bits are preserved.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Event bitmask, both as an OPEN subscription and in EVENT pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u32);

impl EventMask {
    /// File contents updated.
    pub const UPDATED: Self = Self(1 << 0);
    /// Coordination master failed over.
    pub const MASTER_FAILOVER: Self = Self(1 << 1);
    /// A previously queued lock was acquired.
    pub const LOCKED: Self = Self(1 << 2);
    /// The owning session failed; client-synthesised.
    pub const SESS_FAILED: Self = Self(1 << 3);

    /// Raw bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Construct from raw bits; unknown bits are preserved.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Lock flags passed to LOCK and TRYLOCK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockFlags(u32);

impl LockFlags {
    /// A shared (read) lock; the default is exclusive.
    pub const SHARED: Self = Self(1 << 0);

    /// Raw bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Construct from raw bits; unknown bits are preserved.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}
