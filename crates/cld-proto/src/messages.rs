//! Message-body codecs.
//!
//! Bodies are what the fragmenter splits across packets and the
//! reassembler glues back together; none of the types here know anything
//! about packet boundaries. All integers are little-endian. Strings and
//! data blobs are length-prefixed (`u16` for inode names, `u32` for
//! data).
//!
//! Every server response to a client RPC opens with the same two fields,
//! the echoed transaction ID and a result code ([`ResponseHeader`]);
//! op-specific payload follows. Requests carry only their op-specific
//! fields because the XID travels in the packet header.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    MAX_INODE_NAME, MAX_PAYLOAD,
    codes::{EventMask, LockFlags, OpenMode, ResultCode},
    errors::{ProtocolError, Result},
};

/// Bounds-checked little-endian reader over a message body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < self.pos + n {
            return Err(ProtocolError::Truncated { expected: self.pos + n, actual: self.buf.len() });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn encode_name(name: &str, dst: &mut BytesMut) -> Result<()> {
    if name.len() > MAX_INODE_NAME {
        return Err(ProtocolError::TooLarge {
            what: "inode name",
            size: name.len(),
            max: MAX_INODE_NAME,
        });
    }
    dst.put_u16_le(name.len() as u16);
    dst.put_slice(name.as_bytes());
    Ok(())
}

fn decode_name(r: &mut Reader<'_>) -> Result<String> {
    let len = r.u16_le()? as usize;
    if len > MAX_INODE_NAME {
        return Err(ProtocolError::TooLarge { what: "inode name", size: len, max: MAX_INODE_NAME });
    }
    let bytes = r.take(len)?;
    Ok(std::str::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("inode name"))?.to_owned())
}

/// Common prefix of every RPC response: the echoed XID and result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Transaction ID of the request this responds to.
    pub xid: u64,
    /// Server result code.
    pub code: ResultCode,
}

impl ResponseHeader {
    /// Encoded length in bytes.
    pub const LEN: usize = 12;

    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.xid);
        dst.put_u32_le(self.code.to_u32());
    }

    /// Decode from the front of `body`; returns the header and the
    /// remaining op-specific bytes.
    pub fn decode(body: &[u8]) -> Result<(Self, &[u8])> {
        let mut r = Reader::new(body);
        let xid = r.u64_le()?;
        let code = ResultCode::from_u32(r.u32_le()?)?;
        Ok((Self { xid, code }, &body[r.pos..]))
    }
}

/// OPEN request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Open-mode bitmask.
    pub mode: OpenMode,
    /// Events the caller subscribes to on this handle.
    pub events: EventMask,
    /// Absolute inode path.
    pub name: String,
}

impl OpenRequest {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32_le(self.mode.bits());
        dst.put_u32_le(self.events.bits());
        encode_name(&self.name, dst)
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let mode = OpenMode::from_bits(r.u32_le()?);
        let events = EventMask::from_bits(r.u32_le()?);
        let name = decode_name(&mut r)?;
        Ok(Self { mode, events, name })
    }
}

/// OPEN response payload following the [`ResponseHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenResponse {
    /// Server-issued file handle.
    pub fh: u64,
}

impl OpenResponse {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.fh);
    }

    /// Decode from the bytes following the response header.
    pub fn decode(rest: &[u8]) -> Result<Self> {
        let mut r = Reader::new(rest);
        Ok(Self { fh: r.u64_le()? })
    }
}

/// Request body carrying just a file handle (GET, GET_META, CLOSE,
/// UNLOCK).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FhRequest {
    /// Open file handle.
    pub fh: u64,
}

impl FhRequest {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.fh);
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self { fh: r.u64_le()? })
    }
}

/// PUT request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// Open file handle.
    pub fh: u64,
    /// Data to store, at most [`MAX_PAYLOAD`] bytes.
    pub data: Bytes,
}

impl PutRequest {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(ProtocolError::TooLarge {
                what: "put payload",
                size: self.data.len(),
                max: MAX_PAYLOAD,
            });
        }
        dst.put_u64_le(self.fh);
        dst.put_u32_le(self.data.len() as u32);
        dst.put_slice(&self.data);
        Ok(())
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let fh = r.u64_le()?;
        let len = r.u32_le()? as usize;
        if len > MAX_PAYLOAD {
            return Err(ProtocolError::TooLarge { what: "put payload", size: len, max: MAX_PAYLOAD });
        }
        let data = Bytes::copy_from_slice(r.take(len)?);
        Ok(Self { fh, data })
    }
}

/// DEL request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelRequest {
    /// Absolute inode path to delete.
    pub name: String,
}

impl DelRequest {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_name(&self.name, dst)
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self { name: decode_name(&mut r)? })
    }
}

/// LOCK / TRYLOCK request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    /// Open file handle.
    pub fh: u64,
    /// Lock flags.
    pub flags: LockFlags,
}

impl LockRequest {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.fh);
        dst.put_u32_le(self.flags.bits());
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let fh = r.u64_le()?;
        let flags = LockFlags::from_bits(r.u32_le()?);
        Ok(Self { fh, flags })
    }
}

/// Inode metadata carried in GET / GET_META responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Unique inode number.
    pub inum: u64,
    /// Data size in bytes.
    pub size: u32,
    /// Inode version, incremented on every PUT.
    pub version: u64,
    /// Creation time, seconds since the epoch.
    pub time_create: u64,
    /// Last-modification time, seconds since the epoch.
    pub time_modify: u64,
    /// Inode flags.
    pub flags: u32,
    /// Inode path.
    pub inode_name: String,
}

/// GET / GET_META response payload following the [`ResponseHeader`].
///
/// The data section is present only for GET; a GET_META response ends
/// after the metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Inode metadata.
    pub meta: NodeMetadata,
    /// File contents, absent for GET_META.
    pub data: Option<Bytes>,
}

impl GetResponse {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u64_le(self.meta.inum);
        dst.put_u32_le(self.meta.size);
        dst.put_u64_le(self.meta.version);
        dst.put_u64_le(self.meta.time_create);
        dst.put_u64_le(self.meta.time_modify);
        dst.put_u32_le(self.meta.flags);
        encode_name(&self.meta.inode_name, dst)?;
        if let Some(data) = &self.data {
            dst.put_u32_le(data.len() as u32);
            dst.put_slice(data);
        }
        Ok(())
    }

    /// Decode from the bytes following the response header.
    pub fn decode(rest: &[u8]) -> Result<Self> {
        let mut r = Reader::new(rest);
        let inum = r.u64_le()?;
        let size = r.u32_le()?;
        let version = r.u64_le()?;
        let time_create = r.u64_le()?;
        let time_modify = r.u64_le()?;
        let flags = r.u32_le()?;
        let inode_name = decode_name(&mut r)?;

        let data = if r.remaining() == 0 {
            None
        } else {
            let len = r.u32_le()? as usize;
            Some(Bytes::copy_from_slice(r.take(len)?))
        };

        Ok(Self {
            meta: NodeMetadata { inum, size, version, time_create, time_modify, flags, inode_name },
            data,
        })
    }
}

/// Server-pushed EVENT body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMsg {
    /// Handle the event applies to (server-issued ID).
    pub fh: u64,
    /// Conditions being reported.
    pub events: EventMask,
}

impl EventMsg {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.fh);
        dst.put_u32_le(self.events.bits());
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let fh = r.u64_le()?;
        let events = EventMask::from_bits(r.u32_le()?);
        Ok(Self { fh, events })
    }
}

/// Server ACK-FRAG body naming one acknowledged fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFragMsg {
    /// Sequence ID of the fragment being acknowledged.
    pub seqid: u64,
}

impl AckFragMsg {
    /// Encode into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.seqid);
    }

    /// Decode from a complete body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        Ok(Self { seqid: r.u64_le()? })
    }
}
