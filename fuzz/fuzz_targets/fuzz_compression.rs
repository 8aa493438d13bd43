#![no_main]

use datagram_messenger::utils::compression::{compress, decompress, CompressionKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
        if let Ok(compressed) = compress(data, &kind) {
            let restored = decompress(&compressed, &kind);
            assert_eq!(restored.ok().as_deref(), Some(data));
        }
        // malformed input must fail cleanly
        let _ = decompress(data, &kind);
    }
});
