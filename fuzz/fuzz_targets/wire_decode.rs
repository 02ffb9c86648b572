#![no_main]

use libfuzzer_sys::fuzz_target;
use vigil_debug::wire::WireMessage;

const MAX_FRAME_BYTES: usize = 8192;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_FRAME_BYTES)];
    let text = String::from_utf8_lossy(capped);

    // Decoding must never panic; a decoded frame must survive an
    // encode/decode cycle with its shape intact.
    if let Ok(msg) = WireMessage::decode(text.trim_end_matches('\n')) {
        let encoded = msg.encode();
        let again = WireMessage::decode(encoded.trim_end_matches('\n'))
            .expect("encoded frame must decode");
        assert_eq!(again.command, msg.command);
        assert_eq!(again.seq, msg.seq);
        assert_eq!(again.fields(), msg.fields());
    }
});
