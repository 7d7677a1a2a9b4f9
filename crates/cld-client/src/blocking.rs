//! Blocking façade over the sans-IO engine.
//!
//! For callers that cannot supply callbacks. One dedicated I/O thread
//! owns the receive side of the transport: it waits for datagrams with
//! a timeout derived from the engine's next deadline, dispatches into
//! the engine under the session mutex, and transmits whatever the
//! engine queued. Each blocking call issues its RPC under the same
//! mutex with a completion that fills a result cell and signals the
//! session-wide condition variable, then waits on that condition.
//!
//! # Re-entrancy
//!
//! Session and handle event callbacks are NEVER invoked under the
//! session mutex. The engine queues events; the I/O thread drains the
//! queue after releasing the mutex and only then calls user code, so a
//! callback may freely call back into this API. Violating that rule is
//! how the self-pipe generation of this design deadlocked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use cld_core::{
    Completion, Credentials, EngineError, FhId, HostRing, Reply, Session, SessionConfig,
    SessionEvent,
};
use cld_proto::{EventMask, LockFlags, OpenMode, ResultCode, messages::NodeMetadata};

use crate::{
    env::SystemEnv,
    error::ClientError,
    transport::{RECV_BUF_LEN, TcpTransport, Transport, UdpTransport},
};

/// Cap on one receive wait, so shutdown and new deadlines are noticed
/// promptly.
const MAX_POLL: Duration = Duration::from_millis(500);

/// Session-level event callback (SESS_FAILED, MASTER_FAILOVER).
pub type SessionEventFn = Box<dyn FnMut(EventMask) + Send>;

/// Per-handle event callback (UPDATED, LOCKED, ...).
pub type HandleEventFn = Box<dyn FnMut(EventMask) + Send>;

/// Which concrete transport to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// One UDP datagram per packet (the native transport).
    #[default]
    Udp,
    /// Length-prefixed packets over a TCP stream.
    Tcp,
}

/// Outcome of a waiting lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is held.
    Acquired,
    /// Queued server-side; acquisition arrives later as a LOCKED handle
    /// event.
    Pending,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait<'a, T>(cond: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

type CallCell = Arc<Mutex<Option<(ResultCode, Reply)>>>;

fn make_completion(cell: &CallCell, cond: &Arc<Condvar>) -> Completion {
    let cell = Arc::clone(cell);
    let cond = Arc::clone(cond);
    Box::new(move |code, reply| {
        *lock(&cell) = Some((code, reply));
        cond.notify_all();
    })
}

/// Per-handle bookkeeping the engine does not track.
struct HandleState {
    /// Outstanding blocking I/Os on this handle.
    nios: u32,
    /// Set at close issuance; refuses new I/O.
    closing: bool,
}

struct Inner {
    sess: Session<SystemEnv>,
    handle_io: HashMap<FhId, HandleState>,
}

struct Shared {
    inner: Mutex<Inner>,
    cond: Arc<Condvar>,
    transport: Arc<dyn Transport>,
    shutdown: AtomicBool,
    session_cb: Mutex<Option<SessionEventFn>>,
    handle_cbs: Mutex<HashMap<FhId, HandleEventFn>>,
}

impl Shared {
    fn send_all(&self, pkts: Vec<Bytes>) -> std::io::Result<()> {
        for p in pkts {
            self.transport.send_packet(&p)?;
        }
        Ok(())
    }

    /// Issue one RPC under the session mutex and transmit its packets.
    fn start_call<F>(&self, f: F, cell: &CallCell) -> Result<(), ClientError>
    where
        F: FnOnce(&mut Session<SystemEnv>, Completion) -> Result<(), EngineError>,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ClientError::Engine(EngineError::SessionExpired));
        }
        let completion = make_completion(cell, &self.cond);
        let out = {
            let mut inner = lock(&self.inner);
            f(&mut inner.sess, completion)?;
            inner.sess.take_outgoing()
        };
        // a transport error is surfaced, but the message stays queued
        // and keeps retrying
        self.send_all(out)?;
        Ok(())
    }

    /// Block until the completion fills the cell.
    fn wait_result(&self, cell: &CallCell) -> Result<(ResultCode, Reply), ClientError> {
        let mut inner = lock(&self.inner);
        loop {
            if let Some(res) = lock(cell).take() {
                return Ok(res);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(ClientError::Engine(EngineError::SessionExpired));
            }
            inner = wait(&self.cond, inner);
        }
    }

    fn call<F>(&self, f: F) -> Result<(ResultCode, Reply), ClientError>
    where
        F: FnOnce(&mut Session<SystemEnv>, Completion) -> Result<(), EngineError>,
    {
        let cell: CallCell = Arc::new(Mutex::new(None));
        self.start_call(f, &cell)?;
        self.wait_result(&cell)
    }

    /// Like [`Shared::call`] but with per-handle outstanding-I/O
    /// accounting, so close can drain.
    fn call_io<F>(&self, fh: FhId, f: F) -> Result<(ResultCode, Reply), ClientError>
    where
        F: FnOnce(&mut Session<SystemEnv>, Completion) -> Result<(), EngineError>,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ClientError::Engine(EngineError::SessionExpired));
        }
        let cell: CallCell = Arc::new(Mutex::new(None));
        let completion = make_completion(&cell, &self.cond);

        let out = {
            let mut inner = lock(&self.inner);
            match inner.handle_io.get(&fh) {
                None => return Err(ClientError::Engine(EngineError::InvalidHandle)),
                Some(st) if st.closing => return Err(ClientError::HandleClosing),
                Some(_) => {},
            }
            f(&mut inner.sess, completion)?;
            if let Some(st) = inner.handle_io.get_mut(&fh) {
                st.nios += 1;
            }
            inner.sess.take_outgoing()
        };

        if let Err(e) = self.send_all(out) {
            self.finish_io(fh);
            return Err(e.into());
        }

        let res = self.wait_result(&cell);
        self.finish_io(fh);
        res
    }

    fn finish_io(&self, fh: FhId) {
        let mut inner = lock(&self.inner);
        if let Some(st) = inner.handle_io.get_mut(&fh) {
            st.nios = st.nios.saturating_sub(1);
        }
        drop(inner);
        self.cond.notify_all();
    }

    // ---- event dispatch (no session mutex held) -----------------------

    fn dispatch_session_event(&self, mask: EventMask) {
        let cb = lock(&self.session_cb).take();
        if let Some(mut cb) = cb {
            cb(mask);
            let mut slot = lock(&self.session_cb);
            if slot.is_none() {
                *slot = Some(cb);
            }
        }
    }

    fn dispatch_handle_event(&self, fh: FhId, mask: EventMask) {
        let cb = lock(&self.handle_cbs).remove(&fh);
        if let Some(mut cb) = cb {
            cb(mask);
            // reinstall unless the callback closed the handle meanwhile
            let still_open = lock(&self.inner).handle_io.contains_key(&fh);
            if still_open {
                lock(&self.handle_cbs).entry(fh).or_insert(cb);
            }
        }
    }
}

fn io_loop(shared: &Arc<Shared>) {
    let mut buf = [0u8; RECV_BUF_LEN];

    while !shared.shutdown.load(Ordering::SeqCst) {
        let timeout = {
            let inner = lock(&shared.inner);
            let deadline = inner.sess.next_deadline();
            deadline.saturating_duration_since(Instant::now()).min(MAX_POLL)
        };

        match shared.transport.recv_packet(&mut buf, timeout) {
            Ok(Some((n, from))) => {
                let out = {
                    let mut inner = lock(&shared.inner);
                    if let Err(e) = inner.sess.handle_packet(from, &buf[..n]) {
                        debug!("dropping inbound packet: {e}");
                    }
                    inner.sess.take_outgoing()
                };
                if let Err(e) = shared.send_all(out) {
                    warn!("send failed, fragments stay queued: {e}");
                }
            },
            Ok(None) => {},
            Err(e) => {
                // a dead transport would otherwise spin this loop; the
                // session will expire on its own schedule
                warn!("receive failed: {e}");
                thread::sleep(Duration::from_millis(50));
            },
        }

        let out = {
            let mut inner = lock(&shared.inner);
            inner.sess.tick();
            inner.sess.take_outgoing()
        };
        if let Err(e) = shared.send_all(out) {
            warn!("send failed, fragments stay queued: {e}");
        }

        // completions may have fired under the lock above
        shared.cond.notify_all();

        // events are delivered strictly outside the session mutex
        while let Some(ev) = next_event(shared) {
            match ev {
                SessionEvent::SessFailed => {
                    shared.dispatch_session_event(EventMask::SESS_FAILED);
                },
                SessionEvent::NotMaster => {
                    shared.dispatch_session_event(EventMask::MASTER_FAILOVER);
                },
                SessionEvent::Handle { fh, events } => {
                    shared.dispatch_handle_event(fh, events);
                },
            }
        }
    }
}

/// Pop one engine event; the session mutex is released before this
/// returns, so dispatch runs unlocked.
fn next_event(shared: &Shared) -> Option<SessionEvent> {
    lock(&shared.inner).sess.poll_event()
}

/// A confirmed session with blocking call semantics.
///
/// Cheap to share behind an `Arc` is not needed: handles returned by
/// [`BlockingSession::open`] carry their own reference to the session
/// internals and stay usable independently.
pub struct BlockingSession {
    shared: Arc<Shared>,
    io_thread: Option<JoinHandle<()>>,
}

impl BlockingSession {
    /// Connect and establish a session, rotating through `hosts` until
    /// one confirms.
    ///
    /// `event_cb` receives session-level events (SESS_FAILED,
    /// MASTER_FAILOVER) on the I/O thread, outside any lock.
    pub fn connect(
        mut hosts: HostRing,
        creds: &Credentials,
        config: &SessionConfig,
        kind: TransportKind,
        event_cb: Option<SessionEventFn>,
    ) -> Result<Self, ClientError> {
        let mut last_err = String::from("empty host ring");

        for _ in 0..hosts.len() {
            let rec = hosts.active().clone();
            let target = (rec.host.as_str(), rec.port);
            match Self::connect_one(target, creds, config, kind) {
                Ok(sess) => {
                    *lock(&sess.shared.session_cb) = event_cb;
                    return Ok(sess);
                },
                Err(e) => {
                    debug!(host = %rec.host, port = rec.port, "session attempt failed: {e}");
                    last_err = format!("{}:{}: {e}", rec.host, rec.port);
                    hosts.advance();
                },
            }
        }

        Err(ClientError::NoServer(last_err))
    }

    fn connect_one(
        target: (&str, u16),
        creds: &Credentials,
        config: &SessionConfig,
        kind: TransportKind,
    ) -> Result<Self, ClientError> {
        let transport: Arc<dyn Transport> = match kind {
            TransportKind::Udp => Arc::new(UdpTransport::connect(target)?),
            TransportKind::Tcp => Arc::new(TcpTransport::connect(target)?),
        };

        let sess = Session::new(
            SystemEnv,
            config.clone(),
            creds.clone(),
            transport.peer_addr(),
        )?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner { sess, handle_io: HashMap::new() }),
            cond: Arc::new(Condvar::new()),
            transport,
            shutdown: AtomicBool::new(false),
            session_cb: Mutex::new(None),
            handle_cbs: Mutex::new(HashMap::new()),
        });

        let thread_shared = Arc::clone(&shared);
        let io_thread = thread::Builder::new()
            .name("cld-io".into())
            .spawn(move || io_loop(&thread_shared))
            .map_err(ClientError::Io)?;

        let mut session = Self { shared, io_thread: Some(io_thread) };

        match session.shared.call(|sess, c| sess.begin(c)) {
            Ok((code, _)) if code.is_ok() => Ok(session),
            Ok((code, _)) => {
                session.stop_io_thread();
                Err(ClientError::Rpc(code))
            },
            Err(e) => {
                session.stop_io_thread();
                Err(e)
            },
        }
    }

    /// Liveness no-op round trip.
    pub fn nop(&self) -> Result<(), ClientError> {
        let (code, _) = self.shared.call(|s, c| s.nop(c))?;
        ClientError::check(code)
    }

    /// Delete `path` on the server.
    pub fn del(&self, path: &str) -> Result<(), ClientError> {
        let (code, _) = self.shared.call(|s, c| s.del(path, c))?;
        ClientError::check(code)
    }

    /// Open `path`, returning a handle whose `event_cb` (if any)
    /// receives per-handle events for the mask subscribed here.
    pub fn open(
        &self,
        path: &str,
        mode: OpenMode,
        events: EventMask,
        event_cb: Option<HandleEventFn>,
    ) -> Result<BlockingHandle, ClientError> {
        let cell: CallCell = Arc::new(Mutex::new(None));
        let completion = make_completion(&cell, &self.shared.cond);

        let (fh, out) = {
            let mut inner = lock(&self.shared.inner);
            let fh = inner.sess.open(path, mode, events, completion)?;
            inner.handle_io.insert(fh, HandleState { nios: 0, closing: false });
            (fh, inner.sess.take_outgoing())
        };

        if let Some(cb) = event_cb {
            lock(&self.shared.handle_cbs).insert(fh, cb);
        }

        let finish_err = |e: ClientError| {
            lock(&self.shared.inner).handle_io.remove(&fh);
            lock(&self.shared.handle_cbs).remove(&fh);
            Err(e)
        };

        if let Err(e) = self.shared.send_all(out) {
            return finish_err(e.into());
        }

        match self.shared.wait_result(&cell) {
            Ok((code, _)) if code.is_ok() => {
                Ok(BlockingHandle { shared: Arc::clone(&self.shared), fh })
            },
            Ok((code, _)) => finish_err(ClientError::Rpc(code)),
            Err(e) => finish_err(e),
        }
    }

    /// Graceful END-SESS round trip. The session object remains to be
    /// dropped (or [`BlockingSession::close_session`]ed) afterwards.
    pub fn end_session(&self) -> Result<(), ClientError> {
        let (code, _) = self.shared.call(|s, c| s.end_session(c))?;
        ClientError::check(code)
    }

    /// Tear down the I/O thread and the session, without a goodbye to
    /// the server (call [`BlockingSession::end_session`] first for
    /// that). Outstanding blocking calls on other threads return
    /// errors.
    pub fn close_session(mut self) {
        self.stop_io_thread();
    }

    fn stop_io_thread(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        if let Some(t) = self.io_thread.take()
            && t.join().is_err()
        {
            warn!("i/o thread panicked during shutdown");
        }
    }
}

impl Drop for BlockingSession {
    fn drop(&mut self) {
        self.stop_io_thread();
    }
}

/// A blocking view of one open file handle.
///
/// All methods are safe to call from any thread; closing blocks until
/// every outstanding I/O on the handle has completed.
pub struct BlockingHandle {
    shared: Arc<Shared>,
    fh: FhId,
}

impl BlockingHandle {
    /// Store `data` into the file.
    pub fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        let bytes = Bytes::copy_from_slice(data);
        let (code, _) = self.shared.call_io(self.fh, |s, c| s.put(self.fh, bytes, c))?;
        ClientError::check(code)
    }

    /// Fetch metadata and contents.
    pub fn get(&self) -> Result<(NodeMetadata, Bytes), ClientError> {
        let (code, reply) = self.shared.call_io(self.fh, |s, c| s.get(self.fh, false, c))?;
        ClientError::check(code)?;
        match reply {
            Reply::Get { meta, data } => Ok((meta, data.unwrap_or_default())),
            _ => Err(ClientError::Rpc(ResultCode::DataInval)),
        }
    }

    /// Fetch metadata only.
    pub fn get_meta(&self) -> Result<NodeMetadata, ClientError> {
        let (code, reply) = self.shared.call_io(self.fh, |s, c| s.get(self.fh, true, c))?;
        ClientError::check(code)?;
        match reply {
            Reply::Get { meta, .. } => Ok(meta),
            _ => Err(ClientError::Rpc(ResultCode::DataInval)),
        }
    }

    /// Acquire the lock, queueing server-side when contended.
    pub fn lock(&self, shared_lock: bool) -> Result<LockStatus, ClientError> {
        let flags = if shared_lock { LockFlags::SHARED } else { LockFlags::default() };
        let (code, _) = self.shared.call_io(self.fh, |s, c| s.lock(self.fh, flags, true, c))?;
        match code {
            ResultCode::Ok => Ok(LockStatus::Acquired),
            ResultCode::LockPending => Ok(LockStatus::Pending),
            other => Err(ClientError::Rpc(other)),
        }
    }

    /// Acquire the lock or fail fast with
    /// [`ResultCode::LockConflict`].
    pub fn trylock(&self, shared_lock: bool) -> Result<(), ClientError> {
        let flags = if shared_lock { LockFlags::SHARED } else { LockFlags::default() };
        let (code, _) = self.shared.call_io(self.fh, |s, c| s.lock(self.fh, flags, false, c))?;
        ClientError::check(code)
    }

    /// Release the lock.
    pub fn unlock(&self) -> Result<(), ClientError> {
        let (code, _) = self.shared.call_io(self.fh, |s, c| s.unlock(self.fh, c))?;
        ClientError::check(code)
    }

    /// Close the handle.
    ///
    /// New I/O is refused from this point; the call blocks until the
    /// server acknowledges the CLOSE (or it times out) and every
    /// outstanding I/O on the handle has drained. The server's close
    /// result code is not surfaced.
    pub fn close(self) -> Result<(), ClientError> {
        let cell: CallCell = Arc::new(Mutex::new(None));
        let completion = make_completion(&cell, &self.shared.cond);

        let out = {
            let mut inner = lock(&self.shared.inner);
            match inner.handle_io.get_mut(&self.fh) {
                None => return Ok(()),
                Some(st) if st.closing => return Err(ClientError::HandleClosing),
                Some(st) => st.closing = true,
            }
            if let Err(e) = inner.sess.close(self.fh, completion) {
                inner.handle_io.remove(&self.fh);
                drop(inner);
                lock(&self.shared.handle_cbs).remove(&self.fh);
                return Err(e.into());
            }
            inner.sess.take_outgoing()
        };

        if let Err(e) = self.shared.send_all(out) {
            debug!("close transmission failed, retry will cover it: {e}");
        }

        if let Ok((code, _)) = self.shared.wait_result(&cell) {
            if !code.is_ok() {
                debug!(code = %code, "server close returned non-ok, ignoring");
            }
        }

        // wait for outstanding I/Os to drain before the handle is gone
        let mut inner = lock(&self.shared.inner);
        while inner.handle_io.get(&self.fh).is_some_and(|st| st.nios > 0) {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break;
            }
            inner = wait(&self.shared.cond, inner);
        }
        inner.handle_io.remove(&self.fh);
        drop(inner);
        lock(&self.shared.handle_cbs).remove(&self.fh);

        Ok(())
    }
}
