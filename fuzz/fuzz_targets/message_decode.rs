//! Fuzz target for the message-body codecs.
//!
//! Every decoder is exercised against the same arbitrary body; length
//! prefixes that overrun the buffer must fail cleanly.

#![no_main]

use cld_proto::messages::{
    AckFragMsg, DelRequest, EventMsg, FhRequest, GetResponse, LockRequest, OpenRequest,
    OpenResponse, PutRequest, ResponseHeader,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = ResponseHeader::decode(data);
    let _ = OpenRequest::decode(data);
    let _ = OpenResponse::decode(data);
    let _ = FhRequest::decode(data);
    let _ = PutRequest::decode(data);
    let _ = DelRequest::decode(data);
    let _ = LockRequest::decode(data);
    let _ = GetResponse::decode(data);
    let _ = EventMsg::decode(data);
    let _ = AckFragMsg::decode(data);
});
