//! Concrete packet transports.
//!
//! The engine is transport-agnostic; anything that can move whole
//! packets to one server satisfies [`Transport`]. Two adapters ship
//! here: UDP (the native transport, one datagram per packet) and TCP
//! (the same packet bytes behind a 4-byte little-endian length prefix,
//! for networks that drop UDP).
//!
//! Sends may happen from any thread (the façade transmits first
//! attempts from caller threads while its I/O thread transmits retries
//! and ACKs), so `send_packet` takes `&self`; receiving is the I/O
//! thread's alone.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;

/// Largest packet the receive path must accommodate: header, one body
/// fragment, footer, with headroom.
pub const RECV_BUF_LEN: usize = 2048;

/// A datagram-shaped connection to one server.
///
/// `recv_packet` blocks for at most `timeout` and returns `Ok(None)`
/// when nothing arrived; the driver uses that to run its timers.
pub trait Transport: Send + Sync + 'static {
    /// Transmit one packet. Callable from any thread.
    fn send_packet(&self, pkt: &[u8]) -> io::Result<()>;

    /// Receive one packet into `buf`, waiting at most `timeout`.
    fn recv_packet(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Address of the server this transport is bound to.
    fn peer_addr(&self) -> SocketAddr;
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// One UDP datagram per packet.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `server`.
    pub fn connect(server: impl ToSocketAddrs) -> io::Result<Self> {
        let peer = server
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for server"))?;

        let local: SocketAddr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad bind address"))?;

        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        Ok(Self { socket, peer })
    }
}

impl Transport for UdpTransport {
    fn send_packet(&self, pkt: &[u8]) -> io::Result<()> {
        let n = self.socket.send(pkt)?;
        if n != pkt.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short datagram send"));
        }
        Ok(())
    }

    fn recv_packet(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        // zero would mean "block forever"
        self.socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some((n, self.peer))),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Receive half of a TCP transport: stream clone plus reassembly of
/// partially read frames (a read timeout can strike mid-frame).
struct TcpReader {
    stream: TcpStream,
    /// Bytes of the current frame received so far, prefix included.
    partial: Vec<u8>,
}

impl TcpReader {
    /// Pull more bytes toward a complete frame; true when `want` bytes
    /// are buffered.
    fn fill(&mut self, want: usize) -> io::Result<bool> {
        let mut chunk = [0u8; 512];
        while self.partial.len() < want {
            let need = (want - self.partial.len()).min(chunk.len());
            match self.stream.read(&mut chunk[..need]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed the stream",
                    ));
                },
                Ok(n) => self.partial.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// Packets over a TCP stream, each behind a `u32` LE length prefix.
pub struct TcpTransport {
    writer: Mutex<TcpStream>,
    reader: Mutex<TcpReader>,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Connect to `server`.
    pub fn connect(server: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(server)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let reader = TcpReader { stream: stream.try_clone()?, partial: Vec::new() };
        Ok(Self { writer: Mutex::new(stream), reader: Mutex::new(reader), peer })
    }
}

impl Transport for TcpTransport {
    fn send_packet(&self, pkt: &[u8]) -> io::Result<()> {
        let len = u32::try_from(pkt.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "packet too large"))?;

        // one frame per lock acquisition, so concurrent senders cannot
        // interleave prefix and body
        let mut stream = lock(&self.writer);
        stream.write_all(&len.to_le_bytes())?;
        stream.write_all(pkt)?;
        Ok(())
    }

    fn recv_packet(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut reader = lock(&self.reader);
        reader.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        if !reader.fill(4)? {
            return Ok(None);
        }
        let frame_len = u32::from_le_bytes([
            reader.partial[0],
            reader.partial[1],
            reader.partial[2],
            reader.partial[3],
        ]) as usize;
        if frame_len > buf.len() {
            // unrecoverable framing problem; the stream is desynced
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversize frame"));
        }

        if !reader.fill(4 + frame_len)? {
            return Ok(None);
        }

        buf[..frame_len].copy_from_slice(&reader.partial[4..4 + frame_len]);
        reader.partial.clear();
        Ok(Some((frame_len, self.peer)))
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn udp_round_trip() {
        let echo = UdpSocket::bind("127.0.0.1:0").unwrap();
        let echo_addr = echo.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; RECV_BUF_LEN];
            let (n, from) = echo.recv_from(&mut buf).unwrap();
            echo.send_to(&buf[..n], from).unwrap();
        });

        let t = UdpTransport::connect(echo_addr).unwrap();
        t.send_packet(b"ping-bytes").unwrap();

        let mut buf = [0u8; RECV_BUF_LEN];
        let (n, from) = loop {
            if let Some(got) = t.recv_packet(&mut buf, Duration::from_millis(200)).unwrap() {
                break got;
            }
        };
        assert_eq!(&buf[..n], b"ping-bytes");
        assert_eq!(from, echo_addr);
    }

    #[test]
    fn udp_timeout_returns_none() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let t = UdpTransport::connect(peer.local_addr().unwrap()).unwrap();
        let mut buf = [0u8; RECV_BUF_LEN];
        assert!(t.recv_packet(&mut buf, Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn tcp_frames_survive_dribbled_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            // echo two frames back, deliberately split into dribbles
            let mut buf = [0u8; 256];
            let mut got = Vec::new();
            while got.len() < 2 * (4 + 5) {
                let n = conn.read(&mut buf).unwrap();
                got.extend_from_slice(&buf[..n]);
            }
            for chunk in got.chunks(3) {
                conn.write_all(chunk).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
        });

        let t = TcpTransport::connect(addr).unwrap();
        t.send_packet(b"alpha").unwrap();
        t.send_packet(b"bravo").unwrap();

        let mut buf = [0u8; RECV_BUF_LEN];
        let mut frames = Vec::new();
        while frames.len() < 2 {
            if let Some((n, _)) = t.recv_packet(&mut buf, Duration::from_millis(100)).unwrap() {
                frames.push(buf[..n].to_vec());
            }
        }
        assert_eq!(frames, vec![b"alpha".to_vec(), b"bravo".to_vec()]);
    }
}
