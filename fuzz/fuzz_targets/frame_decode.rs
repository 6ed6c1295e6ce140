//! Arbitrary bytes must decode to a frame or an error, never panic.
#![no_main]

use libfuzzer_sys::fuzz_target;
use palisade_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let mut out = Vec::new();
        frame.encode(&mut out);
        assert_eq!(&out[..], &data[..out.len()]);
    }
});
