//! The incremental reader must agree with itself however the stream is cut.
#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use palisade_proto::{Frame, FrameReader};

fn drain(chunks: &[&[u8]]) -> (Vec<Frame>, bool) {
    let mut reader = FrameReader::with_limit(64 * 1024);
    let mut buffer = BytesMut::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        buffer.extend_from_slice(chunk);
        loop {
            match reader.decode(&mut buffer) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) => return (frames, true),
            }
        }
    }
    (frames, false)
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, stream)) = data.split_first() else {
        return;
    };
    let cut = usize::from(split).min(stream.len());

    let whole = drain(&[stream]);
    let chunked = drain(&[&stream[..cut], &stream[cut..]]);
    assert_eq!(whole.0.len(), chunked.0.len());
    assert_eq!(whole.1, chunked.1);
});
