//! Session engine: lifecycle, RPC pipeline, and inbound dispatch.
//!
//! One `Session` is one authenticated conversation with one server. The
//! engine is sans-IO and single-threaded: it never blocks, never calls
//! user code for events, and touches no sockets. Drivers feed it
//! received datagrams via [`Session::handle_packet`], pump time via
//! [`Session::tick`], and transmit whatever [`Session::take_outgoing`]
//! yields. RPC completions fire inside those two entry points; events
//! queue up for [`Session::poll_event`].
//!
//! # State machine
//!
//! ```text
//! ┌─────┐ begin()  ┌────────────────┐ NEW-SESS ok ┌───────────┐
//! │ New │─────────>│ PendingConfirm │────────────>│ Confirmed │
//! └─────┘          └────────────────┘             └───────────┘
//!                        │                              │
//!                        │ deadline                     │ deadline /
//!                        ↓                              ↓ NOT-MASTER
//!                   ┌─────────┐                    ┌─────────┐
//!                   │ Expired │<───────────────────│ Expired │
//!                   └─────────┘                    └─────────┘
//! ```
//!
//! Expiry is terminal: every outstanding RPC completes with a timeout,
//! `SessFailed` is queued, and the struct stays alive (but inert) until
//! the owner drops it.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use cld_proto::{
    EventMask, LockFlags, Magic, MsgInfo, Opcode, OpenMode, Packet, PacketHeader, ProtocolError,
    ResultCode, SID_LEN, auth,
    messages::{
        AckFragMsg, DelRequest, EventMsg, FhRequest, GetResponse, LockRequest, OpenRequest,
        OpenResponse, PutRequest, ResponseHeader,
    },
};

use crate::{
    config::{Credentials, NotMasterPolicy, SessionConfig},
    env::Environment,
    error::EngineError,
    event::{Completion, Reply, SessionEvent},
    handle::{FhId, HandleTable},
    message::{OutboundMessage, PacketRecord, fragment},
    window::{SeqDecision, SeqWindow},
};

/// Bound on queued, undrained session events.
const EVENT_QUEUE_CAP: usize = 64;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed; NEW-SESS not yet sent.
    New,
    /// NEW-SESS sent, awaiting the server's confirmation.
    PendingConfirm,
    /// Confirmed; RPCs may be issued.
    Confirmed,
    /// Terminal. A new session must be opened to continue.
    Expired,
}

/// A session with one CLD server.
pub struct Session<E: Environment> {
    env: E,
    config: SessionConfig,
    creds: Credentials,
    server: SocketAddr,

    sid: [u8; SID_LEN],
    state: SessionState,

    window: SeqWindow,
    next_out: u64,

    /// Op of the inbound message currently being reassembled.
    cur_op: Option<Opcode>,
    reassembly: BytesMut,

    out_msgs: Vec<OutboundMessage<E::Instant>>,
    handles: HandleTable,
    events: VecDeque<SessionEvent>,
    outbox: Vec<Bytes>,

    expire_at: E::Instant,
    retry_at: E::Instant,
    scan_at: E::Instant,
}

impl<E: Environment> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("sid", &self.sid)
            .finish_non_exhaustive()
    }
}

impl<E: Environment> Session<E> {
    /// Create a session bound to `server` in [`SessionState::New`].
    ///
    /// The SID and the initial outbound sequence ID are drawn from the
    /// environment's RNG. Nothing is transmitted until
    /// [`Session::begin`].
    pub fn new(
        env: E,
        config: SessionConfig,
        creds: Credentials,
        server: SocketAddr,
    ) -> Result<Self, EngineError> {
        if creds.user.is_empty() || creds.user.len() > cld_proto::MAX_USERNAME {
            return Err(EngineError::InvalidCredentials("user name length"));
        }
        if creds.secret.is_empty() {
            return Err(EngineError::InvalidCredentials("empty secret"));
        }

        let mut sid = [0u8; SID_LEN];
        env.random_bytes(&mut sid);
        let next_out = env.random_u64();

        let now = env.now();
        let window = SeqWindow::new(config.remembered_window);
        Ok(Self {
            expire_at: now + config.session_expiry,
            retry_at: now + config.retry_interval,
            scan_at: now + config.scan_interval,
            env,
            config,
            creds,
            server,
            sid,
            state: SessionState::New,
            window,
            next_out,
            cur_op: None,
            reassembly: BytesMut::new(),
            out_msgs: Vec::new(),
            handles: HandleTable::default(),
            events: VecDeque::new(),
            outbox: Vec::new(),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session identifier.
    #[must_use]
    pub fn sid(&self) -> [u8; SID_LEN] {
        self.sid
    }

    /// The server this session is bound to.
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// True once the NEW-SESS response has been accepted.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state == SessionState::Confirmed
    }

    /// True once the session has failed; terminal.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state == SessionState::Expired
    }

    /// Number of RPCs still awaiting their response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.out_msgs.iter().filter(|m| !m.done).count()
    }

    /// Drain packets awaiting transmission.
    ///
    /// Call after every engine entry point; a transport failure while
    /// sending is not fatal, the affected fragments simply go out again
    /// on the next retry sweep.
    pub fn take_outgoing(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    /// Pop one queued session event, if any.
    ///
    /// Drivers MUST drain this with no engine lock held before invoking
    /// user event callbacks; see the crate docs on re-entrancy.
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// The earliest instant at which [`Session::tick`] has work to do.
    ///
    /// An expired session has none; its deadline recedes so a polling
    /// driver does not spin.
    #[must_use]
    pub fn next_deadline(&self) -> E::Instant {
        if self.state == SessionState::Expired {
            return self.env.now() + self.config.session_expiry;
        }
        self.retry_at.min(self.expire_at).min(self.scan_at)
    }

    // ---- RPC issuance --------------------------------------------------

    /// Send NEW-SESS and move to [`SessionState::PendingConfirm`].
    pub fn begin(&mut self, completion: Completion) -> Result<(), EngineError> {
        if self.state != SessionState::New {
            return Err(EngineError::InvalidState("begin"));
        }

        let now = self.env.now();
        self.expire_at = now + self.config.session_expiry;
        self.retry_at = now + self.config.retry_interval;
        self.scan_at = now + self.config.scan_interval;
        self.state = SessionState::PendingConfirm;

        self.issue(Opcode::NewSess, &[], completion, None)?;
        Ok(())
    }

    /// Liveness no-op.
    pub fn nop(&mut self, completion: Completion) -> Result<(), EngineError> {
        self.require_confirmed()?;
        self.issue(Opcode::Nop, &[], completion, None)?;
        Ok(())
    }

    /// Graceful session teardown. The session struct itself remains the
    /// owner's to drop once the completion fires.
    pub fn end_session(&mut self, completion: Completion) -> Result<(), EngineError> {
        self.require_confirmed()?;
        self.issue(Opcode::EndSess, &[], completion, None)?;
        Ok(())
    }

    /// Open `path`, subscribing the handle to `events`.
    ///
    /// The returned [`FhId`] is usable for I/O only after the completion
    /// delivers [`ResultCode::Ok`].
    pub fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
        events: EventMask,
        completion: Completion,
    ) -> Result<FhId, EngineError> {
        self.require_confirmed()?;
        check_path(path)?;

        let mut body = BytesMut::new();
        OpenRequest { mode, events, name: path.to_owned() }.encode(&mut body)?;

        let fh = self.handles.insert(events);
        if let Err(e) = self.issue(Opcode::Open, &body, completion, Some(fh)) {
            self.handles.remove(fh);
            return Err(e);
        }
        Ok(fh)
    }

    /// Close a handle.
    ///
    /// The handle is invalid for new I/O from this call onward, without
    /// waiting for the server's acknowledgement.
    pub fn close(&mut self, fh: FhId, completion: Completion) -> Result<(), EngineError> {
        let server_fh = self.handles.server_fh(fh).ok_or(EngineError::InvalidHandle)?;

        if self.state == SessionState::Expired {
            if let Some(h) = self.handles.get_mut(fh) {
                h.valid = false;
            }
            return Err(EngineError::SessionExpired);
        }

        let mut body = BytesMut::new();
        FhRequest { fh: server_fh }.encode(&mut body);

        if let Some(h) = self.handles.get_mut(fh) {
            h.valid = false;
        }
        self.issue(Opcode::Close, &body, completion, Some(fh))?;
        Ok(())
    }

    /// Delete `path`.
    pub fn del(&mut self, path: &str, completion: Completion) -> Result<(), EngineError> {
        self.require_confirmed()?;
        check_path(path)?;

        let mut body = BytesMut::new();
        DelRequest { name: path.to_owned() }.encode(&mut body)?;
        self.issue(Opcode::Del, &body, completion, None)?;
        Ok(())
    }

    /// Store `data` through an open handle.
    pub fn put(&mut self, fh: FhId, data: Bytes, completion: Completion) -> Result<(), EngineError> {
        let server_fh = self.handles.server_fh(fh).ok_or(EngineError::InvalidHandle)?;
        if data.is_empty() {
            return Err(EngineError::InvalidPayload("empty put"));
        }
        if data.len() > cld_proto::MAX_PAYLOAD {
            return Err(EngineError::InvalidPayload("payload exceeds limit"));
        }

        let mut body = BytesMut::new();
        PutRequest { fh: server_fh, data }.encode(&mut body)?;
        self.issue(Opcode::Put, &body, completion, Some(fh))?;
        Ok(())
    }

    /// Fetch metadata, and contents unless `metadata_only`.
    ///
    /// The completion's [`Reply::Get`] owns its bytes; concurrent GETs
    /// on one session are fine.
    pub fn get(
        &mut self,
        fh: FhId,
        metadata_only: bool,
        completion: Completion,
    ) -> Result<(), EngineError> {
        let server_fh = self.handles.server_fh(fh).ok_or(EngineError::InvalidHandle)?;

        let mut body = BytesMut::new();
        FhRequest { fh: server_fh }.encode(&mut body);

        let op = if metadata_only { Opcode::GetMeta } else { Opcode::Get };
        self.issue(op, &body, completion, Some(fh))?;
        Ok(())
    }

    /// Acquire a lock. With `wait`, a contended lock queues server-side
    /// and the completion may deliver [`ResultCode::LockPending`]; the
    /// eventual acquisition arrives as a handle event with the LOCKED
    /// bit. Without `wait`, contention fails with
    /// [`ResultCode::LockConflict`].
    pub fn lock(
        &mut self,
        fh: FhId,
        flags: LockFlags,
        wait: bool,
        completion: Completion,
    ) -> Result<(), EngineError> {
        let server_fh = self.handles.server_fh(fh).ok_or(EngineError::InvalidHandle)?;

        let mut body = BytesMut::new();
        LockRequest { fh: server_fh, flags }.encode(&mut body);

        let op = if wait { Opcode::Lock } else { Opcode::Trylock };
        self.issue(op, &body, completion, Some(fh))?;
        Ok(())
    }

    /// Release a lock.
    pub fn unlock(&mut self, fh: FhId, completion: Completion) -> Result<(), EngineError> {
        let server_fh = self.handles.server_fh(fh).ok_or(EngineError::InvalidHandle)?;

        let mut body = BytesMut::new();
        FhRequest { fh: server_fh }.encode(&mut body);
        self.issue(Opcode::Unlock, &body, completion, Some(fh))?;
        Ok(())
    }

    // ---- time ----------------------------------------------------------

    /// Periodic maintenance: session expiry, expired-message scan, and
    /// the retransmission sweep. Drivers call this whenever
    /// [`Session::next_deadline`] passes; calling early is harmless.
    pub fn tick(&mut self) {
        if self.state == SessionState::Expired {
            return;
        }
        let now = self.env.now();

        if now > self.expire_at {
            debug!("session deadline crossed, expiring");
            self.expire_session();
            return;
        }

        if now >= self.scan_at {
            self.scan_expired(now);
        }

        if now >= self.retry_at {
            for msg in self.out_msgs.iter_mut().filter(|m| !m.done) {
                for rec in msg.pkts.iter_mut().flatten() {
                    rec.retries += 1;
                    trace!(xid = msg.xid, seqid = rec.seqid, retries = rec.retries, "retransmit");
                    self.outbox.push(rec.bytes.clone());
                }
            }
            self.retry_at = now + self.config.retry_interval;
        }
    }

    // ---- inbound -------------------------------------------------------

    /// Process one received datagram.
    ///
    /// Errors mean the packet was dropped; none of them are fatal to the
    /// session except [`EngineError::SessionExpired`].
    pub fn handle_packet(&mut self, from: SocketAddr, raw: &[u8]) -> Result<(), EngineError> {
        if self.state == SessionState::Expired {
            return Err(EngineError::SessionExpired);
        }

        let pkt = Packet::decode(raw)?;
        if pkt.magic != Magic::Server {
            debug!("packet with client magic from the wire");
            return Err(EngineError::Protocol(ProtocolError::BadMagic));
        }

        // A packet naming another user cannot be verified under our key.
        if pkt.header.user != self.creds.user {
            debug!(user = %pkt.header.user, "packet for unknown user");
            return Err(EngineError::Protocol(ProtocolError::AuthFailed));
        }
        auth::verify_packet(&self.creds.secret, raw)?;

        if from != self.server {
            debug!(%from, "server address mismatch");
            return Err(EngineError::AddressMismatch);
        }

        let now = self.env.now();
        if now >= self.scan_at {
            self.scan_expired(now);
        }

        if let MsgInfo::Lead { op, .. } = pkt.header.info {
            self.cur_op = Some(op);
        }
        let Some(op) = self.cur_op else {
            debug!("continuation packet with no message in progress");
            return Err(EngineError::Protocol(ProtocolError::Malformed("continuation")));
        };

        match self.window.accept(pkt.seqid, op) {
            SeqDecision::Reject => {
                debug!(seqid = pkt.seqid, "sequence id out of window");
                return Err(EngineError::SequenceViolation {
                    seqid: pkt.seqid,
                    next_in: self.window.next_in(),
                });
            },
            SeqDecision::Accept | SeqDecision::Duplicate => {},
        }

        if pkt.header.info.order().is_first() {
            self.reassembly.clear();
        }
        let assembled = self.reassembly.len() + pkt.body.len();
        if assembled > self.config.max_message_size {
            self.reassembly.clear();
            self.cur_op = None;
            return Err(EngineError::Protocol(ProtocolError::TooLarge {
                what: "message",
                size: assembled,
                max: self.config.max_message_size,
            }));
        }
        self.reassembly.extend_from_slice(&pkt.body);

        // any authenticated packet from the server refreshes the session
        self.expire_at = now + self.config.session_expiry;

        if pkt.header.info.order().is_last() {
            let body = self.reassembly.split().freeze();
            trace!(op = ?op, len = body.len(), "complete inbound message");
            self.rx_complete(op, &body, pkt.seqid)
        } else {
            self.ack(pkt.seqid);
            Ok(())
        }
    }

    // ---- internals -----------------------------------------------------

    fn require_confirmed(&self) -> Result<(), EngineError> {
        match self.state {
            SessionState::Confirmed => Ok(()),
            SessionState::Expired => Err(EngineError::SessionExpired),
            SessionState::New | SessionState::PendingConfirm => Err(EngineError::NotConfirmed),
        }
    }

    /// Encode, fragment, seal, queue, and transmit one RPC.
    fn issue(
        &mut self,
        op: Opcode,
        body: &[u8],
        completion: Completion,
        fh: Option<FhId>,
    ) -> Result<u64, EngineError> {
        if self.state == SessionState::Expired {
            return Err(EngineError::SessionExpired);
        }

        let xid = self.env.random_u64();
        let frags = fragment(self.sid, &self.creds.user, xid, op, body)?;

        let mut pkts = Vec::with_capacity(frags.len());
        for mut buf in frags {
            let seqid = self.next_out;
            self.next_out = self.next_out.wrapping_add(1);
            auth::sign_packet(&mut buf, seqid, &self.creds.secret);

            let bytes = buf.freeze();
            self.outbox.push(bytes.clone());
            pkts.push(Some(PacketRecord { bytes, seqid, retries: 0 }));
        }

        trace!(op = ?op, xid, n_pkts = pkts.len(), "issue");
        self.out_msgs.push(OutboundMessage {
            xid,
            op,
            pkts,
            done: false,
            expire_at: self.env.now() + self.config.message_expiry,
            completion: Some(completion),
            fh,
        });
        Ok(xid)
    }

    /// Queue an ACK whose footer echoes `seqid`.
    fn ack(&mut self, seqid: u64) {
        let header = PacketHeader {
            sid: self.sid,
            user: self.creds.user.clone(),
            info: MsgInfo::Lead { last: true, xid: 0, op: Opcode::Ack },
        };

        let mut buf = BytesMut::with_capacity(header.encoded_len() + cld_proto::FOOTER_LEN);
        // INVARIANT: the user name was validated at construction, the
        // only failure encode can report.
        if header.encode(Magic::Client, &mut buf).is_err() {
            return;
        }
        auth::sign_packet(&mut buf, seqid, &self.creds.secret);
        self.outbox.push(buf.freeze());
    }

    fn push_event(&mut self, event: SessionEvent) {
        if self.events.len() >= EVENT_QUEUE_CAP {
            warn!("event queue full, dropping oldest");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Fail the session: terminal.
    fn expire_session(&mut self) {
        self.state = SessionState::Expired;

        let mut dropped: Vec<Completion> = Vec::new();
        for mut msg in self.out_msgs.drain(..) {
            if !msg.done && let Some(c) = msg.completion.take() {
                dropped.push(c);
            }
        }
        self.handles.invalidate_all();
        self.push_event(SessionEvent::SessFailed);

        debug!(n = dropped.len(), "session expired, timing out in-flight rpcs");
        for c in dropped {
            c(ResultCode::Timeout, Reply::None);
        }
    }

    /// Drop messages past their individual expiry.
    fn scan_expired(&mut self, now: E::Instant) {
        let mut timed_out: Vec<Completion> = Vec::new();
        self.out_msgs.retain_mut(|msg| {
            if now > msg.expire_at {
                if !msg.done {
                    warn!(xid = msg.xid, "outbound message expired unanswered");
                    if let Some(c) = msg.completion.take() {
                        timed_out.push(c);
                    }
                }
                false
            } else {
                true
            }
        });
        self.scan_at = now + self.config.scan_interval;

        for c in timed_out {
            c(ResultCode::Timeout, Reply::None);
        }
    }

    /// Dispatch a fully reassembled inbound message.
    fn rx_complete(&mut self, op: Opcode, body: &Bytes, seqid: u64) -> Result<(), EngineError> {
        match op {
            Opcode::Ack => {
                debug!("unexpected ACK message");
                Ok(())
            },
            Opcode::Ping => {
                self.ack(seqid);
                Ok(())
            },
            Opcode::NotMaster => {
                self.on_not_master();
                Ok(())
            },
            Opcode::Event => self.on_event(body),
            Opcode::AckFrag => self.on_ack_frag(body),
            _ => self.on_response(body, seqid),
        }
    }

    fn on_not_master(&mut self) {
        warn!("server reports it is not the master");
        self.push_event(SessionEvent::NotMaster);
        match self.config.not_master_policy {
            NotMasterPolicy::FailSession => self.expire_session(),
            NotMasterPolicy::Ignore => {},
        }
    }

    fn on_event(&mut self, body: &Bytes) -> Result<(), EngineError> {
        let ev = EventMsg::decode(body)?;
        match self.handles.find_by_server_fh(ev.fh) {
            Some(fh) => {
                let subscribed =
                    self.handles.get(fh).map(|h| h.events).unwrap_or_default();
                if ev.events.bits() & subscribed.bits() == 0 {
                    debug!(?fh, events = ev.events.bits(), "event outside subscription");
                    return Ok(());
                }
                trace!(?fh, events = ev.events.bits(), "handle event");
                self.push_event(SessionEvent::Handle { fh, events: ev.events });
            },
            None => debug!(server_fh = ev.fh, "event for unknown handle, dropping"),
        }
        Ok(())
    }

    fn on_ack_frag(&mut self, body: &Bytes) -> Result<(), EngineError> {
        let ack = AckFragMsg::decode(body)?;
        for msg in &mut self.out_msgs {
            for slot in &mut msg.pkts {
                if slot.as_ref().is_some_and(|r| r.seqid == ack.seqid) {
                    trace!(xid = msg.xid, seqid = ack.seqid, "fragment acked");
                    *slot = None;
                }
            }
        }
        Ok(())
    }

    /// A response to one of our RPCs: match by XID, complete, ACK.
    fn on_response(&mut self, body: &Bytes, seqid: u64) -> Result<(), EngineError> {
        let (resp, rest) = ResponseHeader::decode(body)?;

        let Some(idx) = self.out_msgs.iter().position(|m| m.xid == resp.xid) else {
            // benign: a late duplicate of a response we already dropped
            debug!(xid = resp.xid, "response with no matching request");
            return Ok(());
        };

        if self.out_msgs[idx].done {
            trace!(xid = resp.xid, "duplicate response, re-acking");
            self.ack(seqid);
            return Ok(());
        }

        let msg_op = self.out_msgs[idx].op;
        let msg_fh = self.out_msgs[idx].fh;

        let reply = if resp.code.is_ok() {
            match msg_op {
                Opcode::NewSess => {
                    self.state = SessionState::Confirmed;
                    Reply::None
                },
                Opcode::Open => {
                    let open = OpenResponse::decode(rest)?;
                    if let Some(id) = msg_fh
                        && let Some(h) = self.handles.get_mut(id)
                    {
                        h.server_fh = Some(open.fh);
                        h.valid = true;
                    }
                    Reply::Open { fh: open.fh }
                },
                Opcode::Get | Opcode::GetMeta => {
                    let get = GetResponse::decode(rest)?;
                    Reply::Get { meta: get.meta, data: get.data }
                },
                Opcode::Close => {
                    if let Some(id) = msg_fh {
                        self.handles.remove(id);
                    }
                    Reply::None
                },
                _ => Reply::None,
            }
        } else {
            // a failed OPEN abandons its reserved slot; a CLOSE retires
            // the handle whatever the server said
            if matches!(msg_op, Opcode::Open | Opcode::Close)
                && let Some(id) = msg_fh
            {
                self.handles.remove(id);
            }
            Reply::None
        };

        let msg = &mut self.out_msgs[idx];
        msg.done = true;
        let completion = msg.completion.take();

        trace!(xid = resp.xid, code = %resp.code, "completing rpc");
        if let Some(c) = completion {
            c(resp.code, reply);
        }

        self.ack(seqid);
        Ok(())
    }
}

fn check_path(path: &str) -> Result<(), EngineError> {
    if !path.starts_with('/') {
        return Err(EngineError::InvalidPath("must start with '/'"));
    }
    if path.len() > cld_proto::MAX_INODE_NAME {
        return Err(EngineError::InvalidPath("name too long"));
    }
    Ok(())
}
