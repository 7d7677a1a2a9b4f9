//! End-to-end engine scenarios against a scripted in-memory server.
//!
//! The fake server speaks real wire bytes through `cld-proto`; nothing
//! here touches a socket. Time is a virtual clock the tests advance by
//! hand.

use std::net::SocketAddr;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use cld_core::{
    Completion, Credentials, EngineError, Environment, Reply, Session, SessionConfig,
    SessionEvent, SessionState,
};
use cld_proto::{
    EventMask, LockFlags, Magic, MsgInfo, Opcode, OpenMode, Packet, PacketHeader, PktOrder,
    ResultCode, SID_LEN, auth,
    messages::{AckFragMsg, EventMsg, GetResponse, NodeMetadata, OpenResponse, ResponseHeader},
};

// ---- test environment --------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct VirtualInstant(u64);

impl std::ops::Sub for VirtualInstant {
    type Output = Duration;
    fn sub(self, rhs: Self) -> Duration {
        Duration::from_millis(self.0 - rhs.0)
    }
}

impl std::ops::Add<Duration> for VirtualInstant {
    type Output = Self;
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.as_millis() as u64)
    }
}

#[derive(Clone)]
struct TestEnv {
    clock_ms: Arc<AtomicU64>,
    next_rand: Arc<AtomicU64>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            clock_ms: Arc::new(AtomicU64::new(0)),
            next_rand: Arc::new(AtomicU64::new(0xA000)),
        }
    }

    fn advance(&self, d: Duration) {
        self.clock_ms.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    type Instant = VirtualInstant;

    fn now(&self) -> VirtualInstant {
        VirtualInstant(self.clock_ms.load(Ordering::SeqCst))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let v = self.next_rand.fetch_add(1, Ordering::SeqCst);
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = (v.wrapping_add(i as u64) & 0xff) as u8;
        }
    }

    fn random_u64(&self) -> u64 {
        self.next_rand.fetch_add(1, Ordering::SeqCst)
    }
}

// ---- completion capture ------------------------------------------------

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<(ResultCode, Reply)>>>);

impl Capture {
    fn completion(&self) -> Completion {
        let inner = self.0.clone();
        Box::new(move |code, reply| inner.lock().unwrap().push((code, reply)))
    }

    fn take(&self) -> Vec<(ResultCode, Reply)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

// ---- scripted server ---------------------------------------------------

const USER: &str = "alice";
const SECRET: &[u8] = b"pw";

fn server_addr() -> SocketAddr {
    "127.0.0.1:8081".parse().unwrap()
}

/// Builds authentic server-side wire bytes with its own sequence-ID
/// counter. It never decides anything; each test scripts the replies.
struct FakeServer {
    sid: [u8; SID_LEN],
    next_seq: u64,
    next_xid: u64,
}

impl FakeServer {
    fn new() -> Self {
        Self { sid: [0; SID_LEN], next_seq: 5000, next_xid: 1 }
    }

    /// Decode and note a client packet (adopting its SID).
    fn observe(&mut self, raw: &[u8]) -> Packet {
        auth::verify_packet(SECRET, raw).expect("client packet must authenticate");
        let pkt = Packet::decode(raw).expect("client packet must parse");
        assert_eq!(pkt.magic, Magic::Client);
        self.sid = pkt.header.sid;
        pkt
    }

    /// One sealed FIRST_LAST server packet.
    fn packet(&mut self, op: Opcode, body: &[u8]) -> Vec<u8> {
        let seqid = self.next_seq;
        self.next_seq += 1;
        self.packet_with_seqid(op, body, seqid)
    }

    fn packet_with_seqid(&mut self, op: Opcode, body: &[u8], seqid: u64) -> Vec<u8> {
        let xid = self.next_xid;
        self.next_xid += 1;

        let header = PacketHeader {
            sid: self.sid,
            user: USER.into(),
            info: MsgInfo::Lead { last: true, xid, op },
        };
        let mut buf = BytesMut::new();
        header.encode(Magic::Server, &mut buf).unwrap();
        buf.extend_from_slice(body);
        auth::sign_packet(&mut buf, seqid, SECRET);
        buf.to_vec()
    }

    /// A multi-fragment server message with consecutive sequence IDs.
    fn fragmented(&mut self, op: Opcode, body: &[u8], frag_size: usize) -> Vec<Vec<u8>> {
        let chunks: Vec<&[u8]> = body.chunks(frag_size).collect();
        let n = chunks.len().max(1);
        let xid = self.next_xid;
        self.next_xid += 1;

        let mut pkts = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let info = if i == 0 {
                MsgInfo::Lead { last: n == 1, xid, op }
            } else {
                MsgInfo::Cont { last: i == n - 1 }
            };
            let header = PacketHeader { sid: self.sid, user: USER.into(), info };
            let mut buf = BytesMut::new();
            header.encode(Magic::Server, &mut buf).unwrap();
            buf.extend_from_slice(chunk);
            auth::sign_packet(&mut buf, self.next_seq, SECRET);
            self.next_seq += 1;
            pkts.push(buf.to_vec());
        }
        pkts
    }

    /// Response to a client request: echoes its XID, same op.
    fn respond(&mut self, req: &Packet, code: ResultCode, extra: &[u8]) -> Vec<u8> {
        let mut body = BytesMut::new();
        ResponseHeader { xid: req.header.info.xid().unwrap(), code }.encode(&mut body);
        body.extend_from_slice(extra);
        self.packet(req.header.info.op().unwrap(), &body)
    }

    fn open_ok(&mut self, req: &Packet, fh: u64) -> Vec<u8> {
        let mut extra = BytesMut::new();
        OpenResponse { fh }.encode(&mut extra);
        self.respond(req, ResultCode::Ok, &extra)
    }

    fn get_ok(&mut self, req: &Packet, data: Option<&[u8]>, version: u64) -> Vec<u8> {
        let meta = NodeMetadata {
            inum: 7,
            size: data.map_or(0, |d| d.len() as u32),
            version,
            time_create: 1000,
            time_modify: 2000,
            flags: 0,
            inode_name: "/foo".into(),
        };
        let resp = GetResponse { meta, data: data.map(Bytes::copy_from_slice) };
        let mut extra = BytesMut::new();
        resp.encode(&mut extra).unwrap();
        self.respond(req, ResultCode::Ok, &extra)
    }

    fn event(&mut self, server_fh: u64, events: EventMask) -> Vec<u8> {
        let mut body = BytesMut::new();
        EventMsg { fh: server_fh, events }.encode(&mut body);
        self.packet(Opcode::Event, &body)
    }

    fn ack_frag(&mut self, seqid: u64) -> Vec<u8> {
        let mut body = BytesMut::new();
        AckFragMsg { seqid }.encode(&mut body);
        self.packet(Opcode::AckFrag, &body)
    }
}

// ---- harness -----------------------------------------------------------

struct Harness {
    env: TestEnv,
    sess: Session<TestEnv>,
    server: FakeServer,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    fn with_config(config: SessionConfig) -> Self {
        let env = TestEnv::new();
        let sess = Session::new(
            env.clone(),
            config,
            Credentials::new(USER, SECRET.to_vec()),
            server_addr(),
        )
        .unwrap();
        Self { env, sess, server: FakeServer::new() }
    }

    /// Drain the client outbox as decoded packets (the server "sees"
    /// them all).
    fn client_pkts(&mut self) -> Vec<(Vec<u8>, Packet)> {
        self.sess
            .take_outgoing()
            .into_iter()
            .map(|raw| {
                let pkt = self.server.observe(&raw);
                (raw.to_vec(), pkt)
            })
            .collect()
    }

    fn deliver(&mut self, raw: &[u8]) -> Result<(), EngineError> {
        self.sess.handle_packet(server_addr(), raw)
    }

    /// Run session establishment to Confirmed.
    fn confirm(&mut self) {
        let done = Capture::default();
        self.sess.begin(done.completion()).unwrap();
        let pkts = self.client_pkts();
        assert_eq!(pkts.len(), 1);

        let resp = self.server.respond(&pkts[0].1, ResultCode::Ok, &[]);
        self.deliver(&resp).unwrap();

        assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::None)]);
        assert!(self.sess.is_confirmed());
        // the response is ACKed
        let acks = self.client_pkts();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.header.info.op(), Some(Opcode::Ack));
    }

    /// Open a path and script an OK response carrying `server_fh`.
    fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
        events: EventMask,
        server_fh: u64,
    ) -> cld_core::FhId {
        let done = Capture::default();
        let fh = self.sess.open(path, mode, events, done.completion()).unwrap();
        let pkts = self.client_pkts();
        let resp = self.server.open_ok(&pkts[0].1, server_fh);
        self.deliver(&resp).unwrap();
        assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::Open { fh: server_fh })]);
        self.client_pkts(); // drop the ack
        fh
    }
}

// ---- scenarios ---------------------------------------------------------

#[test]
fn establish_session() {
    let mut h = Harness::new();
    assert_eq!(h.sess.state(), SessionState::New);
    h.confirm();
    assert_eq!(h.sess.state(), SessionState::Confirmed);
    assert_eq!(h.sess.in_flight(), 0);
}

#[test]
fn new_sess_rejection_leaves_session_unconfirmed() {
    let mut h = Harness::new();
    let done = Capture::default();
    h.sess.begin(done.completion()).unwrap();
    let pkts = h.client_pkts();

    let resp = h.server.respond(&pkts[0].1, ResultCode::CliExists, &[]);
    h.deliver(&resp).unwrap();

    assert_eq!(done.take(), vec![(ResultCode::CliExists, Reply::None)]);
    assert!(!h.sess.is_confirmed());
    assert_eq!(h.sess.state(), SessionState::PendingConfirm);
}

#[test]
fn open_write_read_round_trip() {
    let mut h = Harness::new();
    h.confirm();

    let fh = h.open(
        "/foo",
        OpenMode::CREATE | OpenMode::WRITE | OpenMode::READ,
        EventMask::default(),
        42,
    );

    // PUT "hello": one FIRST_LAST fragment
    let done = Capture::default();
    h.sess.put(fh, Bytes::from_static(b"hello"), done.completion()).unwrap();
    let pkts = h.client_pkts();
    assert_eq!(pkts.len(), 1);
    assert_eq!(pkts[0].1.header.info.order(), PktOrder::FirstLast);

    let resp = h.server.respond(&pkts[0].1, ResultCode::Ok, &[]);
    h.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::None)]);
    h.client_pkts();

    // GET returns the data and version 1
    let done = Capture::default();
    h.sess.get(fh, false, done.completion()).unwrap();
    let pkts = h.client_pkts();
    let resp = h.server.get_ok(&pkts[0].1, Some(&b"hello"[..]), 1);
    h.deliver(&resp).unwrap();

    let replies = done.take();
    assert_eq!(replies.len(), 1);
    let (code, reply) = &replies[0];
    assert_eq!(*code, ResultCode::Ok);
    match reply {
        Reply::Get { meta, data } => {
            assert_eq!(meta.version, 1);
            assert_eq!(data.as_deref(), Some(&b"hello"[..]));
        },
        other => panic!("expected Reply::Get, got {other:?}"),
    }
}

#[test]
fn get_meta_has_no_data_section() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::READ, EventMask::default(), 42);

    let done = Capture::default();
    h.sess.get(fh, true, done.completion()).unwrap();
    let pkts = h.client_pkts();
    assert_eq!(pkts[0].1.header.info.op(), Some(Opcode::GetMeta));

    let resp = h.server.get_ok(&pkts[0].1, None, 3);
    h.deliver(&resp).unwrap();

    match &done.take()[0] {
        (ResultCode::Ok, Reply::Get { meta, data }) => {
            assert_eq!(meta.version, 3);
            assert!(data.is_none());
        },
        other => panic!("unexpected completion {other:?}"),
    }
}

#[test]
fn large_put_fragments_with_consecutive_seqids() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::WRITE, EventMask::default(), 42);

    let done = Capture::default();
    let body = Bytes::from(vec![0x5Au8; 3000]);
    h.sess.put(fh, body, done.completion()).unwrap();

    let pkts = h.client_pkts(); // observe() verified each HMAC already
    assert_eq!(pkts.len(), 3);
    let orders: Vec<_> = pkts.iter().map(|(_, p)| p.header.info.order()).collect();
    assert_eq!(orders, vec![PktOrder::First, PktOrder::Mid, PktOrder::Last]);

    assert_eq!(pkts[1].1.seqid, pkts[0].1.seqid + 1);
    assert_eq!(pkts[2].1.seqid, pkts[1].1.seqid + 1);

    // only the lead fragment names the transaction
    assert!(pkts[0].1.header.info.xid().is_some());
    assert!(pkts[1].1.header.info.xid().is_none());
}

#[test]
fn lost_fragment_is_retransmitted_and_rpc_completes() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::WRITE, EventMask::default(), 42);

    let done = Capture::default();
    h.sess.put(fh, Bytes::from(vec![1u8; 3000]), done.completion()).unwrap();
    let first_attempt = h.client_pkts();
    assert_eq!(first_attempt.len(), 3);
    // pretend the LAST fragment was lost on the wire: the server keeps
    // FIRST and MID, so nothing completes yet
    assert_eq!(done.count(), 0);

    h.env.advance(Duration::from_secs(5));
    h.sess.tick();
    let resent = h.client_pkts();
    assert_eq!(resent.len(), 3);
    for (raw, _) in &first_attempt {
        assert!(resent.iter().any(|(r, _)| r == raw), "retransmission must be byte-identical");
    }

    // this time everything arrives; the server answers
    let req = &resent[0].1;
    let resp = h.server.respond(req, ResultCode::Ok, &[]);
    h.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::None)]);
}

#[test]
fn acked_fragments_leave_the_retry_set() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::WRITE, EventMask::default(), 42);

    h.sess.put(fh, Bytes::from(vec![2u8; 3000]), Capture::default().completion()).unwrap();
    let pkts = h.client_pkts();
    assert_eq!(pkts.len(), 3);

    // server acks the MID fragment individually
    let frag_ack = h.server.ack_frag(pkts[1].1.seqid);
    h.deliver(&frag_ack).unwrap();

    h.env.advance(Duration::from_secs(5));
    h.sess.tick();
    let resent = h.sess.take_outgoing();
    assert_eq!(resent.len(), 2);
    assert!(resent.iter().all(|raw| {
        let seq = Packet::decode(raw).unwrap().seqid;
        seq != pkts[1].1.seqid
    }));
}

#[test]
fn duplicate_response_is_reacked_but_completes_once() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::WRITE, EventMask::default(), 42);

    let done = Capture::default();
    h.sess.put(fh, Bytes::from_static(b"hello"), done.completion()).unwrap();
    let pkts = h.client_pkts();
    let resp = h.server.respond(&pkts[0].1, ResultCode::Ok, &[]);

    h.deliver(&resp).unwrap();
    assert_eq!(done.count(), 1);
    let acks = h.client_pkts();
    assert_eq!(acks.len(), 1);
    let first_ack_echo = acks[0].1.seqid;

    // the server replays the identical response (same XID, same seqid)
    h.deliver(&resp).unwrap();
    assert_eq!(done.count(), 1, "completion must not re-fire");
    let acks = h.client_pkts();
    assert_eq!(acks.len(), 1, "duplicate still produces an ACK");
    assert_eq!(acks[0].1.seqid, first_ack_echo);
}

#[test]
fn out_of_window_packet_is_dropped_without_ack() {
    let mut h = Harness::new();
    h.confirm();

    // far-future seqid
    let stray = h.server.packet_with_seqid(Opcode::Ping, &[], 999_999);
    let err = h.deliver(&stray).unwrap_err();
    assert!(matches!(err, EngineError::SequenceViolation { .. }));
    assert!(h.sess.take_outgoing().is_empty());
}

#[test]
fn corrupted_packet_is_rejected() {
    let mut h = Harness::new();
    h.confirm();

    let mut pkt = h.server.packet(Opcode::Ping, &[]);
    let len = pkt.len();
    pkt[len / 2] ^= 0x40;
    let err = h.deliver(&pkt).unwrap_err();
    assert!(matches!(err, EngineError::Protocol(_)));
    assert!(h.sess.take_outgoing().is_empty());
}

#[test]
fn packet_from_wrong_address_is_rejected() {
    let mut h = Harness::new();
    h.confirm();

    let pkt = h.server.packet(Opcode::Ping, &[]);
    let err = h.sess.handle_packet("127.0.0.1:9999".parse().unwrap(), &pkt).unwrap_err();
    assert_eq!(err, EngineError::AddressMismatch);
}

#[test]
fn ping_is_acked_silently() {
    let mut h = Harness::new();
    h.confirm();

    let ping = h.server.packet(Opcode::Ping, &[]);
    h.deliver(&ping).unwrap();

    let out = h.client_pkts();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1.header.info.op(), Some(Opcode::Ack));
    assert!(h.sess.poll_event().is_none());
}

#[test]
fn fragmented_inbound_response_reassembles() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::READ, EventMask::default(), 42);

    let done = Capture::default();
    h.sess.get(fh, false, done.completion()).unwrap();
    let req = h.client_pkts().remove(0).1;

    // a 2500-byte file comes back split across several packets
    let payload = vec![0xC3u8; 2500];
    let meta = NodeMetadata {
        inum: 7,
        size: payload.len() as u32,
        version: 9,
        time_create: 0,
        time_modify: 0,
        flags: 0,
        inode_name: "/foo".into(),
    };
    let mut body = BytesMut::new();
    ResponseHeader { xid: req.header.info.xid().unwrap(), code: ResultCode::Ok }
        .encode(&mut body);
    GetResponse { meta, data: Some(Bytes::from(payload.clone())) }.encode(&mut body).unwrap();

    let frags = h.server.fragmented(Opcode::Get, &body, 1000);
    assert!(frags.len() > 1);
    for frag in &frags {
        h.deliver(frag).unwrap();
    }

    match &done.take()[0] {
        (ResultCode::Ok, Reply::Get { data, .. }) => {
            assert_eq!(data.as_deref(), Some(&payload[..]));
        },
        other => panic!("unexpected completion {other:?}"),
    }

    // every non-final fragment was acked as it arrived, plus the
    // whole-message ack
    let acks = h.client_pkts();
    assert_eq!(acks.len(), frags.len());
    assert!(acks.iter().all(|(_, p)| p.header.info.op() == Some(Opcode::Ack)));
}

#[test]
fn oversize_reassembly_is_dropped_as_bad_packet() {
    let config = SessionConfig { max_message_size: 2048, ..SessionConfig::default() };
    let mut h = Harness::with_config(config);
    h.confirm();

    let frags = h.server.fragmented(Opcode::Get, &[0u8; 3000], 1000);
    h.deliver(&frags[0]).unwrap();
    h.deliver(&frags[1]).unwrap();
    let err = h.deliver(&frags[2]).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Protocol(cld_proto::ProtocolError::TooLarge { .. })
    ));
}

#[test]
fn session_expiry_times_out_outstanding_rpcs_once() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::WRITE, EventMask::default(), 42);

    let done = Capture::default();
    h.sess.put(fh, Bytes::from_static(b"hello"), done.completion()).unwrap();
    h.client_pkts();

    // inbound traffic stops entirely
    h.env.advance(Duration::from_secs(121));
    h.sess.tick();

    assert_eq!(h.sess.state(), SessionState::Expired);
    assert_eq!(done.take(), vec![(ResultCode::Timeout, Reply::None)]);
    assert_eq!(h.sess.poll_event(), Some(SessionEvent::SessFailed));
    assert_eq!(h.sess.poll_event(), None);

    // handles died with the session
    assert!(matches!(
        h.sess.put(fh, Bytes::from_static(b"x"), Capture::default().completion()),
        Err(EngineError::InvalidHandle)
    ));
}

#[test]
fn lock_conflict_pending_and_event_delivery() {
    // two independent sessions, one scripted server state
    let mut h1 = Harness::new();
    h1.confirm();
    let fh1 = h1.open("/bar", OpenMode::LOCK, EventMask::LOCKED, 101);

    let mut h2 = Harness::new();
    h2.confirm();
    let fh2 = h2.open("/bar", OpenMode::LOCK, EventMask::LOCKED, 202);

    // first session takes the exclusive lock
    let done = Capture::default();
    h1.sess.lock(fh1, LockFlags::default(), true, done.completion()).unwrap();
    let req = h1.client_pkts().remove(0).1;
    assert_eq!(req.header.info.op(), Some(Opcode::Lock));
    let resp = h1.server.respond(&req, ResultCode::Ok, &[]);
    h1.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::None)]);

    // second session: trylock conflicts
    let done = Capture::default();
    h2.sess.lock(fh2, LockFlags::default(), false, done.completion()).unwrap();
    let req = h2.client_pkts().remove(0).1;
    let resp = h2.server.respond(&req, ResultCode::LockConflict, &[]);
    h2.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::LockConflict, Reply::None)]);
    h2.client_pkts();

    // second session queues a waiting lock
    let done = Capture::default();
    h2.sess.lock(fh2, LockFlags::default(), true, done.completion()).unwrap();
    let req = h2.client_pkts().remove(0).1;
    assert_eq!(req.header.info.op(), Some(Opcode::Lock));
    let resp = h2.server.respond(&req, ResultCode::LockPending, &[]);
    h2.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::LockPending, Reply::None)]);
    h2.client_pkts();

    // first session unlocks; the server grants the queued lock and
    // posts the LOCKED event to the second session's handle
    let done = Capture::default();
    h1.sess.unlock(fh1, done.completion()).unwrap();
    let req = h1.client_pkts().remove(0).1;
    let resp = h1.server.respond(&req, ResultCode::Ok, &[]);
    h1.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::None)]);

    let ev = h2.server.event(202, EventMask::LOCKED);
    h2.deliver(&ev).unwrap();
    assert_eq!(
        h2.sess.poll_event(),
        Some(SessionEvent::Handle { fh: fh2, events: EventMask::LOCKED })
    );
}

#[test]
fn event_for_unknown_handle_is_dropped() {
    let mut h = Harness::new();
    h.confirm();

    let ev = h.server.event(777, EventMask::UPDATED);
    h.deliver(&ev).unwrap();
    assert!(h.sess.poll_event().is_none());
}

#[test]
fn close_invalidates_handle_immediately() {
    let mut h = Harness::new();
    h.confirm();
    let fh = h.open("/foo", OpenMode::WRITE, EventMask::default(), 42);

    let done = Capture::default();
    h.sess.close(fh, done.completion()).unwrap();

    // before the server acknowledges, the handle already refuses I/O
    assert!(matches!(
        h.sess.put(fh, Bytes::from_static(b"x"), Capture::default().completion()),
        Err(EngineError::InvalidHandle)
    ));

    let req = h.client_pkts().remove(0).1;
    let resp = h.server.respond(&req, ResultCode::Ok, &[]);
    h.deliver(&resp).unwrap();
    assert_eq!(done.take(), vec![(ResultCode::Ok, Reply::None)]);
}
