//! Arbitrary bytes fed to the frame decoder in arbitrary chunks.
//!
//! The decoder must never panic, and must stop at the first fatal error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use maekawa_proto::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    let Some((&split, bytes)) = data.split_first() else { return };
    let chunk = usize::from(split).max(1);

    let mut decoder = FrameDecoder::new();
    for piece in bytes.chunks(chunk) {
        decoder.extend_from_slice(piece);
        loop {
            match decoder.decode_next() {
                Ok(Some(_)) => {},
                Ok(None) => break,
                Err(error) if error.is_fatal() => return,
                Err(_) => {},
            }
        }
    }
});
