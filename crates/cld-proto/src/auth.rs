//! Packet footer authentication.
//!
//! Every packet ends with an 8-byte little-endian sequence ID followed by
//! an HMAC-SHA1 digest over every preceding byte (header ‖ body ‖ seqid),
//! keyed by the user's secret. The secret itself never crosses the wire.

use bytes::{BufMut, BytesMut};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{
    DIGEST_LEN, FOOTER_LEN,
    errors::{ProtocolError, Result},
};

type HmacSha1 = Hmac<Sha1>;

fn mac(key: &[u8]) -> HmacSha1 {
    // INVARIANT: HMAC accepts keys of any length (longer keys are hashed
    // down, shorter keys are zero-padded), so construction cannot fail.
    #[allow(clippy::expect_used)]
    HmacSha1::new_from_slice(key).expect("invariant: HMAC-SHA1 accepts any key length")
}

/// Compute the HMAC-SHA1 of `data` under `key`.
#[must_use]
pub fn sign(key: &[u8], data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut m = mac(key);
    m.update(data);
    m.finalize().into_bytes().into()
}

/// Constant-time digest comparison.
#[must_use]
pub fn verify(key: &[u8], data: &[u8], digest: &[u8]) -> bool {
    let mut m = mac(key);
    m.update(data);
    m.verify_slice(digest).is_ok()
}

/// Seal an encoded header ‖ body buffer into a complete wire packet.
///
/// Appends the footer: the sequence ID, then the digest over everything
/// written so far (including the sequence ID just appended).
pub fn sign_packet(buf: &mut BytesMut, seqid: u64, key: &[u8]) {
    buf.put_u64_le(seqid);
    let digest = sign(key, buf);
    buf.put_slice(&digest);
}

/// Verify a complete wire packet's footer digest.
///
/// # Errors
///
/// - `ProtocolError::Truncated` if the packet cannot hold a footer
/// - `ProtocolError::AuthFailed` if the digest does not verify
pub fn verify_packet(key: &[u8], pkt: &[u8]) -> Result<()> {
    if pkt.len() < FOOTER_LEN {
        return Err(ProtocolError::Truncated { expected: FOOTER_LEN, actual: pkt.len() });
    }

    let split = pkt.len() - DIGEST_LEN;
    if verify(key, &pkt[..split], &pkt[split..]) {
        Ok(())
    } else {
        Err(ProtocolError::AuthFailed)
    }
}
