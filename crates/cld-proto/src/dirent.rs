//! Directory-listing payload codec.
//!
//! When a GET targets a directory inode, the data section is a packed
//! sequence of records, each `u16 LE name_len ‖ name_bytes ‖ zero pad`
//! with the record padded to the next 8-byte boundary. A record that
//! claims more bytes than remain makes the whole payload invalid.

use bytes::{BufMut, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Round `n` up to the next multiple of 8.
fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Length of the record at the front of `buf`, and the name length.
fn record_len(buf: &[u8]) -> Result<(usize, usize)> {
    if buf.len() < 2 {
        return Err(ProtocolError::Malformed("directory record"));
    }
    let name_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let total = align8(2 + name_len);
    if total > buf.len() {
        return Err(ProtocolError::Malformed("directory record"));
    }
    Ok((total, name_len))
}

/// Iterator over the entry names of a directory payload.
///
/// Yields each name as a borrowed string slice; stops at the first
/// malformed record after yielding the error.
#[derive(Debug, Clone)]
pub struct DirentIter<'a> {
    buf: &'a [u8],
}

impl<'a> DirentIter<'a> {
    /// Iterate the records of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for DirentIter<'a> {
    type Item = Result<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        match record_len(self.buf) {
            Ok((total, name_len)) => {
                let name = &self.buf[2..2 + name_len];
                self.buf = &self.buf[total..];
                Some(
                    std::str::from_utf8(name)
                        .map_err(|_| ProtocolError::Malformed("directory record")),
                )
            },
            Err(e) => {
                // poison: do not resynchronise after a bad record
                self.buf = &[];
                Some(Err(e))
            },
        }
    }
}

/// Validate a directory payload and count its records in one pass.
pub fn dirent_count(buf: &[u8]) -> Result<usize> {
    let mut rest = buf;
    let mut count = 0usize;
    while !rest.is_empty() {
        let (total, _) = record_len(rest)?;
        rest = &rest[total..];
        count += 1;
    }
    Ok(count)
}

/// Append one record to a directory payload under construction.
///
/// Used by tests and by anything that needs to fabricate listings; the
/// server is the canonical producer.
pub fn append_dirent(dst: &mut BytesMut, name: &str) {
    let rec_len = 2 + name.len();
    dst.put_u16_le(name.len() as u16);
    dst.put_slice(name.as_bytes());
    for _ in rec_len..align8(rec_len) {
        dst.put_u8(0);
    }
}
