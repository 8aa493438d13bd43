use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use datagram_messenger::config::BufferConfig;
use datagram_messenger::core::codec::{Decoded, FrameCodec};
use datagram_messenger::core::frame_buffer::FrameBuffer;
use datagram_messenger::core::payload::TypeRegistry;
use datagram_messenger::utils::compression::{CompressionKind, NoCompression, StandardCompression};
use datagram_messenger::utils::crypto::ChaChaCryptography;
use datagram_messenger::Context;

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let context = Context::detached(None);
    let payload_sizes = [64usize, 512, 4096, 65536];

    let codecs = [
        ("plain", FrameCodec::new(TypeRegistry::new()).with_compression(Arc::new(NoCompression))),
        ("lz4", FrameCodec::default()),
        (
            "zstd",
            FrameCodec::new(TypeRegistry::new())
                .with_compression(Arc::new(StandardCompression::new(CompressionKind::Zstd))),
        ),
        (
            "lz4_chacha",
            FrameCodec::default().with_cryptography(Some(Arc::new(ChaChaCryptography::new([9u8; 32])))),
        ),
    ];

    for &size in &payload_sizes {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        for (name, codec) in &codecs {
            group.bench_function(format!("encode_{name}_{size}b"), |b| {
                b.iter(|| codec.encode_bytes(&context, &payload).unwrap())
            });

            let frame = codec.encode_bytes(&context, &payload).unwrap();
            group.bench_function(format!("decode_{name}_{size}b"), |b| {
                b.iter(|| {
                    let decoded = codec.decode(&context, &frame);
                    assert!(matches!(decoded, Decoded::Frame { .. }));
                })
            });
        }
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_reassembly");
    let context = Context::detached(None);
    let codec = FrameCodec::default();

    let mut batch = Vec::new();
    for i in 0..64u32 {
        batch.extend(codec.encode_bytes(&context, &i.to_le_bytes().repeat(32)).unwrap());
    }
    group.throughput(Throughput::Bytes(batch.len() as u64));

    group.bench_function("extract_64_frames", |b| {
        b.iter_batched(
            || FrameBuffer::new(&BufferConfig::default()),
            |mut buffer| {
                buffer.append(&batch).unwrap();
                let frames = buffer.extract_frames(&codec, &context);
                assert_eq!(frames.len(), 64);
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("extract_split_datagrams", |b| {
        b.iter_batched(
            || FrameBuffer::new(&BufferConfig::default()),
            |mut buffer| {
                let mut total = 0;
                for chunk in batch.chunks(509) {
                    buffer.append(chunk).unwrap();
                    total += buffer.extract_frames(&codec, &context).len();
                }
                assert_eq!(total, 64);
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_reassembly);
criterion_main!(benches);
