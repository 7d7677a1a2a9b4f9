//! Fuzz target for Packet::decode
//!
//! Arbitrary bytes must never panic the packet parser: malformed
//! headers, truncated footers, bogus length prefixes, and unknown
//! op/order values all have to come back as errors.

#![no_main]

use cld_proto::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Packet::decode(data);
});
