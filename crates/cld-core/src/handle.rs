//! Session-local file-handle table.
//!
//! Handles are created at OPEN issuance, bound to their server-issued
//! 64-bit ID when the OPEN response arrives, invalidated the moment a
//! CLOSE is issued, and removed when the CLOSE completes. Callers refer
//! to handles by [`FhId`], an index into this table; nothing here holds
//! a reference back to the session.

use cld_proto::EventMask;

/// Opaque local identifier for a file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FhId(pub(crate) u32);

#[derive(Debug)]
pub(crate) struct FileHandle {
    /// Server-issued ID; `None` until the OPEN response arrives.
    pub server_fh: Option<u64>,
    /// Cleared on CLOSE issuance and on session expiry.
    pub valid: bool,
    /// Events subscribed at open.
    pub events: EventMask,
}

/// Table of a session's handles, indexed by [`FhId`].
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    slots: Vec<Option<FileHandle>>,
}

impl HandleTable {
    /// Reserve a slot for an OPEN in flight.
    pub fn insert(&mut self, events: EventMask) -> FhId {
        let fh = FileHandle { server_fh: None, valid: false, events };
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(fh);
                return FhId(i as u32);
            }
        }
        self.slots.push(Some(fh));
        FhId((self.slots.len() - 1) as u32)
    }

    pub fn get(&self, id: FhId) -> Option<&FileHandle> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: FhId) -> Option<&mut FileHandle> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Server-issued ID for a handle that is open and valid.
    pub fn server_fh(&self, id: FhId) -> Option<u64> {
        self.get(id).filter(|h| h.valid).and_then(|h| h.server_fh)
    }

    /// Reverse lookup used for EVENT routing.
    pub fn find_by_server_fh(&self, server_fh: u64) -> Option<FhId> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref()
                .filter(|h| h.server_fh == Some(server_fh))
                .map(|_| FhId(i as u32))
        })
    }

    pub fn remove(&mut self, id: FhId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// Forcibly invalidate every handle (session expiry).
    pub fn invalidate_all(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.valid = false;
        }
    }
}
