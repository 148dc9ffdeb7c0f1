//! Decoded messages from arbitrary bytes applied to a node.
//!
//! Whatever arrives, the node's state must stay consistent: at most one
//! grant, the grant never also queued, and the clock never going back.

#![no_main]

use libfuzzer_sys::fuzz_target;
use maekawa_core::{MaekawaNode, Quorum};
use maekawa_proto::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    let mut node = MaekawaNode::new(0, Quorum::new([0, 1, 2]));
    let _ = node.request_access();

    let mut decoder = FrameDecoder::new();
    decoder.extend_from_slice(data);

    loop {
        let message = match decoder.decode_next() {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(error) if error.is_fatal() => break,
            Err(_) => continue,
        };

        let before = node.clock();
        let _ = node.handle_message(&message);
        assert!(node.clock() >= before);

        if let Some(granted) = node.grantor().granted() {
            assert!(node.grantor().queue().all(|entry| entry != granted));
        }

        if node.in_critical_section() {
            let _ = node.release_access();
        }
    }
});
