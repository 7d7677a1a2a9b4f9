//! Blocking façade smoke tests against an in-process UDP server.
//!
//! The server thread speaks just enough of the protocol for the happy
//! path: it confirms sessions, stores one file, and answers GETs. The
//! engine-level corner cases live in `cld-core`'s scenario tests.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use cld_client::{BlockingSession, ClientError, TransportKind};
use cld_core::{Credentials, HostRing, SessionConfig};
use cld_proto::{
    EventMask, Magic, MsgInfo, Opcode, OpenMode, Packet, PacketHeader, ResultCode, auth,
    messages::{GetResponse, NodeMetadata, OpenResponse, PutRequest, ResponseHeader},
};

const SECRET: &[u8] = b"pw";

/// Spawn a minimal single-file CLD server. When `mute_after_confirm`
/// is set it answers the NEW-SESS and then goes silent, which is how
/// the expiry test starves the client of traffic.
fn spawn_server(mute_after_confirm: bool) -> SocketAddr {
    let sock = UdpSocket::bind("127.0.0.1:0").expect("bind server socket");
    let addr = sock.local_addr().expect("server addr");

    thread::spawn(move || {
        let mut seq: u64 = 9000;
        let mut xid: u64 = 1;
        let mut version: u64 = 0;
        let mut content: Vec<u8> = Vec::new();
        let confirmed = AtomicBool::new(false);
        let mut buf = [0u8; 2048];

        loop {
            let Ok((n, from)) = sock.recv_from(&mut buf) else { return };
            if auth::verify_packet(SECRET, &buf[..n]).is_err() {
                continue;
            }
            let Ok(pkt) = Packet::decode(&buf[..n]) else { continue };
            let Some(op) = pkt.header.info.op() else { continue };
            let Some(client_xid) = pkt.header.info.xid() else { continue };

            if op == Opcode::Ack {
                continue;
            }
            if mute_after_confirm && confirmed.load(Ordering::SeqCst) {
                continue;
            }

            let mut body = BytesMut::new();
            ResponseHeader { xid: client_xid, code: ResultCode::Ok }.encode(&mut body);

            match op {
                Opcode::NewSess => {
                    confirmed.store(true, Ordering::SeqCst);
                },
                Opcode::Open => OpenResponse { fh: 42 }.encode(&mut body),
                Opcode::Put => {
                    if let Ok(req) = PutRequest::decode(&pkt.body) {
                        content = req.data.to_vec();
                        version += 1;
                    }
                },
                Opcode::Get | Opcode::GetMeta => {
                    let meta = NodeMetadata {
                        inum: 7,
                        size: content.len() as u32,
                        version,
                        time_create: 100,
                        time_modify: 200,
                        flags: 0,
                        inode_name: "/foo".into(),
                    };
                    let data =
                        (op == Opcode::Get).then(|| Bytes::copy_from_slice(&content));
                    GetResponse { meta, data }.encode(&mut body).expect("encode get");
                },
                // NOP, CLOSE, DEL, END_SESS: bare OK
                _ => {},
            }

            let header = PacketHeader {
                sid: pkt.header.sid,
                user: pkt.header.user.clone(),
                info: MsgInfo::Lead { last: true, xid, op },
            };
            xid += 1;

            let mut out = BytesMut::new();
            header.encode(Magic::Server, &mut out).expect("encode header");
            out.extend_from_slice(&body);
            auth::sign_packet(&mut out, seq, SECRET);
            seq += 1;

            let _ = sock.send_to(&out, from);
        }
    });

    addr
}

fn creds() -> Credentials {
    Credentials::new("alice", SECRET.to_vec())
}

#[test]
fn session_open_write_read_close() {
    let addr = spawn_server(false);
    let ring = HostRing::single(addr.ip().to_string(), addr.port());

    let sess = BlockingSession::connect(
        ring,
        &creds(),
        &SessionConfig::default(),
        TransportKind::Udp,
        None,
    )
    .expect("session should confirm");

    sess.nop().expect("nop");

    let fh = sess
        .open(
            "/foo",
            OpenMode::CREATE | OpenMode::WRITE | OpenMode::READ,
            EventMask::default(),
            None,
        )
        .expect("open");

    fh.put(b"hello").expect("put");

    let (meta, data) = fh.get().expect("get");
    assert_eq!(&data[..], b"hello");
    assert_eq!(meta.version, 1);
    assert_eq!(meta.inode_name, "/foo");

    let meta = fh.get_meta().expect("get_meta");
    assert_eq!(meta.version, 1);

    fh.close().expect("close");

    sess.del("/foo").expect("del");
    sess.end_session().expect("end session");
    sess.close_session();
}

#[test]
fn invalid_path_fails_locally() {
    let addr = spawn_server(false);
    let ring = HostRing::single(addr.ip().to_string(), addr.port());

    let sess = BlockingSession::connect(
        ring,
        &creds(),
        &SessionConfig::default(),
        TransportKind::Udp,
        None,
    )
    .expect("session should confirm");

    // no leading slash: rejected before anything hits the wire
    assert!(matches!(
        sess.open("foo", OpenMode::READ, EventMask::default(), None),
        Err(ClientError::Engine(_))
    ));
}

#[test]
fn silent_server_fails_session_and_reports_event() {
    let addr = spawn_server(true);
    let ring = HostRing::single(addr.ip().to_string(), addr.port());

    let config = SessionConfig {
        retry_interval: Duration::from_millis(50),
        session_expiry: Duration::from_millis(300),
        ..SessionConfig::default()
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sess = BlockingSession::connect(
        ring,
        &creds(),
        &config,
        TransportKind::Udp,
        Some(Box::new(move |mask| {
            sink.lock().expect("event sink").push(mask);
        })),
    )
    .expect("session should confirm");

    // the server has gone silent; this blocks until session expiry
    // synthesises a timeout
    let err = sess.nop().expect_err("nop must time out");
    assert!(matches!(err, ClientError::Rpc(ResultCode::Timeout)));

    // event delivery happens on the i/o thread, outside any lock
    thread::sleep(Duration::from_millis(300));
    let events = seen.lock().expect("event sink");
    assert_eq!(events.len(), 1, "SESS_FAILED must fire exactly once");
    assert!(events[0].contains(EventMask::SESS_FAILED));
}
