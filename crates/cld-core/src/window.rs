//! Inbound sequence-ID acceptance window.
//!
//! Sequence IDs are 64-bit counters compared with wrap-around (serial
//! number) arithmetic. The window remembers the last `remembered`
//! in-order IDs so that a retransmitting server is re-ACKed without the
//! message being re-delivered; anything further back, or ahead of the
//! next expected ID, is rejected.

use cld_proto::Opcode;

/// Wrap-around `a >= b` for sequence IDs.
fn after_eq(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) >= 0
}

/// Verdict for one inbound sequence ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqDecision {
    /// In-order packet; the window advanced.
    Accept,
    /// Retransmission of an already-processed ID; re-ACK, the window did
    /// not advance.
    Duplicate,
    /// Outside the window; drop without acknowledging.
    Reject,
}

impl SeqDecision {
    /// Whether the packet should be processed at all.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Reject)
    }
}

/// Acceptance state for one direction of one session.
#[derive(Debug, Clone)]
pub struct SeqWindow {
    next_in: u64,
    window_low: u64,
    remembered: u64,
}

impl SeqWindow {
    /// A window that accepts nothing until a NEW-SESS response seeds it.
    #[must_use]
    pub fn new(remembered: u64) -> Self {
        Self { next_in: 0, window_low: 0u64.wrapping_sub(remembered), remembered }
    }

    /// The next expected inbound sequence ID.
    #[must_use]
    pub fn next_in(&self) -> u64 {
        self.next_in
    }

    /// Lower bound of the duplicate-tolerance window.
    #[must_use]
    pub fn window_low(&self) -> u64 {
        self.window_low
    }

    /// Judge one inbound sequence ID.
    ///
    /// The decision depends on the op of the message the packet belongs
    /// to: NEW-SESS seeds the window with the server's initial ID,
    /// NOT-MASTER and ACK-FRAG are out-of-band and always pass, and
    /// everything else is held to the window.
    pub fn accept(&mut self, seqid: u64, op: Opcode) -> SeqDecision {
        match op {
            Opcode::NewSess => {
                self.next_in = seqid.wrapping_add(1);
                self.window_low = self.next_in.wrapping_sub(self.remembered);
                SeqDecision::Accept
            },

            Opcode::NotMaster | Opcode::AckFrag => SeqDecision::Accept,

            _ => {
                if seqid == self.next_in {
                    self.next_in = self.next_in.wrapping_add(1);
                    self.window_low = self.window_low.wrapping_add(1);
                    return SeqDecision::Accept;
                }

                if after_eq(seqid, self.window_low) && !after_eq(seqid, self.next_in) {
                    return SeqDecision::Duplicate;
                }

                SeqDecision::Reject
            },
        }
    }
}
