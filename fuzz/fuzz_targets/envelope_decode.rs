//! Envelope decoding from hostile input: markers, identities and payloads.
#![no_main]

use libfuzzer_sys::fuzz_target;
use palisade_proto::{Envelope, NodeId, Perspective};

fuzz_target!(|data: &[u8]| {
    let perspective = Perspective::new(
        NodeId::new("server", ([10, 0, 0, 1], 3300).into()),
        NodeId::provisional(([10, 0, 0, 2], 51000).into()),
    );

    if let Ok(envelope) = Envelope::decode(data, &perspective) {
        let mut out = Vec::new();
        let _ = envelope.encode(&perspective, &mut out);
    }
});
