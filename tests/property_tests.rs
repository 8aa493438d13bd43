//! Property-based tests using proptest
//!
//! These tests check the framing invariants across randomly generated
//! payloads, split points and corruptions.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use datagram_messenger::config::{BufferConfig, FRAME_HEADER_SIZE};
use datagram_messenger::core::codec::{Decoded, FrameCodec};
use datagram_messenger::core::crc16;
use datagram_messenger::core::frame_buffer::FrameBuffer;
use datagram_messenger::core::payload::TypeRegistry;
use datagram_messenger::utils::compression::{
    CompressionKind, CompressionProvider, NoCompression, StandardCompression,
};
use datagram_messenger::utils::crypto::{ChaChaCryptography, CryptographyProvider};
use datagram_messenger::{Context, Datagram, Payload};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    values: Vec<i64>,
    flag: bool,
}

impl Datagram for Reading {
    const TYPE_TAG: &'static str = "prop.reading";
}

fn codec_with(
    compression: Arc<dyn CompressionProvider>,
    cryptography: Option<Arc<dyn CryptographyProvider>>,
) -> FrameCodec {
    let types = TypeRegistry::new();
    types.register::<Reading>().unwrap();
    FrameCodec::new(types)
        .with_compression(compression)
        .with_cryptography(cryptography)
}

fn all_codecs() -> Vec<FrameCodec> {
    let compressions: Vec<Arc<dyn CompressionProvider>> = vec![
        Arc::new(NoCompression),
        Arc::new(StandardCompression::new(CompressionKind::Lz4)),
    ];
    let mut codecs = Vec::new();
    for compression in compressions {
        codecs.push(codec_with(compression.clone(), None));
        codecs.push(codec_with(
            compression,
            Some(Arc::new(ChaChaCryptography::new([42u8; 32]))),
        ));
    }
    codecs
}

fn buffer() -> FrameBuffer {
    FrameBuffer::new(&BufferConfig {
        initial_size: 64,
        max_size: 1024 * 1024,
        growth_rate: 0.2,
    })
}

fn reading_strategy() -> impl Strategy<Value = Reading> {
    (
        "[a-z0-9-]{0,24}",
        prop::collection::vec(any::<i64>(), 0..32),
        any::<bool>(),
    )
        .prop_map(|(sensor, values, flag)| Reading {
            sensor,
            values,
            flag,
        })
}

proptest! {
    #[test]
    fn prop_datagram_roundtrip_every_provider_combination(reading in reading_strategy()) {
        let context = Context::detached(None);
        for codec in all_codecs() {
            let frame = codec.encode_datagram(&context, &reading).unwrap();
            match codec.decode(&context, &frame) {
                Decoded::Frame { payload, consumed } => {
                    prop_assert_eq!(consumed, frame.len());
                    prop_assert_eq!(payload.downcast_ref::<Reading>(), Some(&reading));
                }
                other => prop_assert!(false, "unexpected decode outcome {:?}", other),
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_raw_bytes_exact(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let context = Context::detached(None);
        for codec in all_codecs() {
            let frame = codec.encode_bytes(&context, &data).unwrap();
            match codec.decode(&context, &frame) {
                Decoded::Frame { payload: Payload::Bytes(bytes), .. } => prop_assert_eq!(&bytes, &data),
                other => prop_assert!(false, "unexpected decode outcome {:?}", other),
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_fragmentation_independent(
        data in prop::collection::vec(any::<u8>(), 1..2048),
        split_seed in any::<usize>(),
    ) {
        let context = Context::detached(None);
        let codec = FrameCodec::default();
        let frame = codec.encode_bytes(&context, &data).unwrap();
        let split = 1 + split_seed % (frame.len() - 1);

        let mut buffer = buffer();
        buffer.append(&frame[..split]).unwrap();
        prop_assert!(buffer.extract_frames(&codec, &context).is_empty());
        buffer.append(&frame[split..]).unwrap();

        let results = buffer.extract_frames(&codec, &context);
        prop_assert_eq!(results.len(), 1);
        match &results[0] {
            Ok(Payload::Bytes(bytes)) => prop_assert_eq!(bytes, &data),
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }
}

proptest! {
    #[test]
    fn prop_batched_frames_in_order(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8),
    ) {
        let context = Context::detached(None);
        let codec = FrameCodec::default();
        let mut batch = Vec::new();
        for message in &messages {
            batch.extend(codec.encode_bytes(&context, message).unwrap());
        }

        let mut buffer = buffer();
        buffer.append(&batch).unwrap();
        let got: Vec<Vec<u8>> = buffer
            .extract_frames(&codec, &context)
            .into_iter()
            .map(|r| match r {
                Ok(Payload::Bytes(bytes)) => bytes,
                other => panic!("unexpected result {other:?}"),
            })
            .collect();
        prop_assert_eq!(got, messages);
        prop_assert!(buffer.is_empty());
    }
}

proptest! {
    #[test]
    fn prop_single_corruption_drops_only_that_frame(
        first in prop::collection::vec(any::<u8>(), 1..128),
        second in prop::collection::vec(any::<u8>(), 1..128),
        third in prop::collection::vec(any::<u8>(), 1..128),
        offset_seed in any::<usize>(),
        flip in 1u8..=255,
    ) {
        let context = Context::detached(None);
        let codec = FrameCodec::default();
        let mut damaged = codec.encode_bytes(&context, &second).unwrap();
        let body_len = damaged.len() - FRAME_HEADER_SIZE;
        damaged[FRAME_HEADER_SIZE + offset_seed % body_len] ^= flip;

        let mut batch = codec.encode_bytes(&context, &first).unwrap();
        batch.extend(damaged);
        batch.extend(codec.encode_bytes(&context, &third).unwrap());

        let mut buffer = buffer();
        buffer.append(&batch).unwrap();
        let got: Vec<Vec<u8>> = buffer
            .extract_frames(&codec, &context)
            .into_iter()
            .filter_map(|r| match r {
                Ok(Payload::Bytes(bytes)) => Some(bytes),
                _ => None,
            })
            .collect();
        prop_assert_eq!(got, vec![first, third]);
    }
}

proptest! {
    #[test]
    fn prop_crc_deterministic(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        prop_assert_eq!(crc16::checksum(&data), crc16::checksum(&data.clone()));
    }
}

proptest! {
    #[test]
    fn prop_random_noise_never_panics(noise in prop::collection::vec(any::<u8>(), 0..2048)) {
        let context = Context::detached(None);
        let codec = FrameCodec::default();
        let mut buffer = buffer();
        buffer.append(&noise).unwrap();
        let _ = buffer.extract_frames(&codec, &context);
    }
}

#[test]
fn crc_check_value() {
    assert_eq!(crc16::checksum(b"123456789"), 0xBB3D);
}
