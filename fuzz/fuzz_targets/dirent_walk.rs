//! Fuzz target for the directory-record cursor.
//!
//! Record lengths come straight off the wire; walking a hostile
//! listing must terminate and must never read out of bounds.

#![no_main]

use cld_proto::{DirentIter, dirent_count};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = dirent_count(data);
    for entry in DirentIter::new(data) {
        if entry.is_err() {
            break;
        }
    }
});
