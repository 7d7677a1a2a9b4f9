//! Outbound message records and the fragmenter.
//!
//! A logical RPC body is split into one or more wire packets of at most
//! [`MAX_PKT_BODY`] body bytes. Packet 0 carries FIRST (or FIRST_LAST
//! for single-packet messages) together with the XID and op; the final
//! packet carries LAST. Fragments leave here unsealed: the session
//! appends the footer (sequence ID + HMAC) when the first transmission
//! happens, and retransmissions reuse the sealed bytes unchanged so the
//! server sees stable sequence IDs.

use bytes::{Bytes, BytesMut};

use cld_proto::{MAX_PKT_BODY, Magic, MsgInfo, Opcode, PacketHeader, SID_LEN};

use crate::{error::EngineError, event::Completion, handle::FhId};

/// Split `body` into unsealed packet buffers (header ‖ body slice).
pub(crate) fn fragment(
    sid: [u8; SID_LEN],
    user: &str,
    xid: u64,
    op: Opcode,
    body: &[u8],
) -> Result<Vec<BytesMut>, EngineError> {
    let n_pkts = if body.is_empty() { 1 } else { body.len().div_ceil(MAX_PKT_BODY) };

    let mut pkts = Vec::with_capacity(n_pkts);
    for i in 0..n_pkts {
        let first = i == 0;
        let last = i == n_pkts - 1;

        let info = if first {
            MsgInfo::Lead { last, xid, op }
        } else {
            MsgInfo::Cont { last }
        };
        let header = PacketHeader { sid, user: user.to_owned(), info };

        let chunk = &body[i * MAX_PKT_BODY..(i * MAX_PKT_BODY + MAX_PKT_BODY).min(body.len())];

        let mut buf = BytesMut::with_capacity(header.encoded_len() + chunk.len());
        header.encode(Magic::Client, &mut buf)?;
        buf.extend_from_slice(chunk);
        pkts.push(buf);
    }

    Ok(pkts)
}

/// One sealed wire packet belonging to an outbound message.
#[derive(Debug, Clone)]
pub(crate) struct PacketRecord {
    /// Complete packet bytes including footer; retransmitted verbatim.
    pub bytes: Bytes,
    /// Sequence ID assigned at first transmission.
    pub seqid: u64,
    /// How many retransmissions have happened.
    pub retries: u32,
}

/// A pending RPC awaiting its response.
///
/// Packet slots become `None` as ACK-FRAG messages retire individual
/// fragments. The record itself stays queued after `done` so that a
/// duplicate response can be re-ACKed without re-firing the completion;
/// the periodic scan removes it once it expires.
pub(crate) struct OutboundMessage<I> {
    pub xid: u64,
    pub op: Opcode,
    pub pkts: Vec<Option<PacketRecord>>,
    pub done: bool,
    pub expire_at: I,
    pub completion: Option<Completion>,
    /// Local handle this RPC operates on, if any.
    pub fh: Option<FhId>,
}

impl<I> std::fmt::Debug for OutboundMessage<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundMessage")
            .field("xid", &self.xid)
            .field("op", &self.op)
            .field("pkts", &self.pkts.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use cld_proto::{Packet, PktOrder, auth};

    use super::*;

    fn orders(body_len: usize) -> Vec<PktOrder> {
        let body = vec![0xABu8; body_len];
        let pkts = fragment([1; SID_LEN], "alice", 7, Opcode::Put, &body).unwrap();

        let mut total_body = 0usize;
        let mut out = Vec::new();
        for (i, mut p) in pkts.into_iter().enumerate() {
            auth::sign_packet(&mut p, i as u64, b"pw");
            let decoded = Packet::decode(&p).unwrap();
            total_body += decoded.body.len();
            out.push(decoded.header.info.order());
        }
        if body_len > 0 {
            assert_eq!(total_body, body_len);
        }
        out
    }

    #[test]
    fn empty_body_is_one_first_last_fragment() {
        assert_eq!(orders(0), vec![PktOrder::FirstLast]);
    }

    #[test]
    fn exactly_one_fragment_at_the_limit() {
        assert_eq!(orders(MAX_PKT_BODY), vec![PktOrder::FirstLast]);
    }

    #[test]
    fn one_byte_past_the_limit_splits() {
        assert_eq!(orders(MAX_PKT_BODY + 1), vec![PktOrder::First, PktOrder::Last]);
    }

    #[test]
    fn three_kilobyte_body_makes_three_fragments() {
        assert_eq!(orders(3000), vec![PktOrder::First, PktOrder::Mid, PktOrder::Last]);
    }

    #[test]
    fn only_the_lead_fragment_names_the_transaction() {
        let body = vec![0u8; MAX_PKT_BODY * 2 + 10];
        let pkts = fragment([1; SID_LEN], "alice", 99, Opcode::Put, &body).unwrap();

        for (i, mut p) in pkts.into_iter().enumerate() {
            auth::sign_packet(&mut p, i as u64, b"pw");
            let decoded = Packet::decode(&p).unwrap();
            if i == 0 {
                assert_eq!(decoded.header.info.xid(), Some(99));
                assert_eq!(decoded.header.info.op(), Some(Opcode::Put));
            } else {
                assert_eq!(decoded.header.info.xid(), None);
            }
        }
    }
}
