#![no_main]

use datagram_messenger::config::BufferConfig;
use datagram_messenger::core::codec::FrameCodec;
use datagram_messenger::core::frame_buffer::FrameBuffer;
use datagram_messenger::Context;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let context = Context::detached(None);
    let codec = FrameCodec::default();

    // single-shot decode must classify any input without panicking
    let _ = codec.decode(&context, data);

    // the reassembly buffer must always make progress on arbitrary datagrams
    let mut buffer = FrameBuffer::new(&BufferConfig::default());
    for chunk in data.chunks(97) {
        if buffer.append(chunk).is_ok() {
            let _ = buffer.extract_frames(&codec, &context);
        }
    }
});
