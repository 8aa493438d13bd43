//! # Frame Codec
//!
//! Turns payloads into frames and frames back into payloads.
//!
//! ## Encode
//! payload → text (serialization provider) → [`FrameBody`] → bincode →
//! compress → encrypt (if configured) → CRC16 → header + body
//!
//! ## Decode
//! Decoding is done at the head of a reassembly buffer and reports one of
//! four outcomes, see [`Decoded`]. Only a frame that passed its checksum can
//! be `Rejected`; damaged bytes are always `Corrupt` so the caller can
//! resynchronize on the next delimiter.

use std::sync::Arc;

use crate::config::{BYTES_TYPE_TAG, FRAME_HEADER_SIZE};
use crate::core::crc16;
use crate::core::frame::{self, FrameBody, FrameHeader, DELIMITER_BYTES};
use crate::core::payload::{
    Datagram, KeepAlive, KeepAliveReply, Payload, TypeRegistry, KEEPALIVE_REPLY_TYPE_TAG,
    KEEPALIVE_TYPE_TAG,
};
use crate::core::serialization::{self, JsonSerialization, SerializationProvider};
use crate::error::{ProtocolError, Result};
use crate::protocol::context::Context;
use crate::utils::compression::{CompressionProvider, StandardCompression};
use crate::utils::crypto::CryptographyProvider;

/// Outcome of decoding at the head of a buffer.
#[derive(Debug)]
pub enum Decoded {
    /// A complete frame; `consumed` bytes belong to it.
    Frame { payload: Payload, consumed: usize },
    /// More bytes are needed before anything can be decided.
    Incomplete,
    /// Bad delimiter, impossible size or checksum mismatch.
    Corrupt,
    /// The frame was intact but its body could not be decoded.
    Rejected {
        consumed: usize,
        error: ProtocolError,
    },
}

/// Providers and type registry used to encode and decode frames.
#[derive(Clone)]
pub struct FrameCodec {
    serialization: Arc<dyn SerializationProvider>,
    compression: Arc<dyn CompressionProvider>,
    cryptography: Option<Arc<dyn CryptographyProvider>>,
    types: TypeRegistry,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(TypeRegistry::new())
    }
}

impl FrameCodec {
    /// Codec with the built-in providers.
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            serialization: Arc::new(JsonSerialization),
            compression: Arc::new(StandardCompression::default()),
            cryptography: None,
            types,
        }
    }

    pub fn with_serialization(mut self, provider: Arc<dyn SerializationProvider>) -> Self {
        self.serialization = provider;
        self
    }

    pub fn with_compression(mut self, provider: Arc<dyn CompressionProvider>) -> Self {
        self.compression = provider;
        self
    }

    pub fn with_cryptography(mut self, provider: Option<Arc<dyn CryptographyProvider>>) -> Self {
        self.cryptography = provider;
        self
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Frame an application datagram.
    pub fn encode_datagram<T: Datagram>(&self, context: &Context, datagram: &T) -> Result<Vec<u8>> {
        let text = serialization::to_text(self.serialization.as_ref(), datagram)?;
        self.encode_body(context, &FrameBody::text(T::TYPE_TAG, text))
    }

    /// Frame raw bytes without object serialization.
    pub fn encode_bytes(&self, context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        self.encode_body(context, &FrameBody::bytes(data))
    }

    /// Compress, encrypt and frame a body.
    pub fn encode_body(&self, context: &Context, body: &FrameBody) -> Result<Vec<u8>> {
        let body_bytes = body.to_bytes()?;
        let mut wire_body = self.compression.compress(context, &body_bytes)?;
        if let Some(cryptography) = &self.cryptography {
            wire_body = cryptography.encrypt(context, &wire_body)?;
        }
        frame::assemble(&wire_body)
    }

    /// Decode the frame at the head of `buf`.
    pub fn decode(&self, context: &Context, buf: &[u8]) -> Decoded {
        if buf.len() >= DELIMITER_BYTES.len() && buf[..DELIMITER_BYTES.len()] != DELIMITER_BYTES {
            return Decoded::Corrupt;
        }

        let header = match FrameHeader::parse(buf) {
            Some(header) => header,
            None => return Decoded::Incomplete,
        };

        if !header.is_plausible() {
            return Decoded::Corrupt;
        }

        let gross_size = header.gross_size as usize;
        if buf.len() < gross_size {
            return Decoded::Incomplete;
        }

        let body = &buf[FRAME_HEADER_SIZE..gross_size];
        if crc16::checksum(body) != header.crc {
            return Decoded::Corrupt;
        }

        match self.decode_body(context, body) {
            Ok(payload) => Decoded::Frame {
                payload,
                consumed: gross_size,
            },
            Err(error) => Decoded::Rejected {
                consumed: gross_size,
                error,
            },
        }
    }

    fn decode_body(&self, context: &Context, wire_body: &[u8]) -> Result<Payload> {
        let compressed = match &self.cryptography {
            Some(cryptography) => cryptography.decrypt(context, wire_body)?,
            None => wire_body.to_vec(),
        };
        let body_bytes = self.compression.decompress(context, &compressed)?;
        let body = FrameBody::from_bytes(&body_bytes)?;

        if body.type_tag == BYTES_TYPE_TAG {
            return Ok(Payload::Bytes(body.payload_bytes));
        }

        let text = String::from_utf8(body.payload_bytes)
            .map_err(|e| ProtocolError::DeserializeError(e.to_string()))?;

        match body.type_tag.as_str() {
            KEEPALIVE_TYPE_TAG => Ok(Payload::KeepAlive(self.decode_builtin::<KeepAlive>(&text)?)),
            KEEPALIVE_REPLY_TYPE_TAG => Ok(Payload::KeepAliveReply(
                self.decode_builtin::<KeepAliveReply>(&text)?,
            )),
            _ => self
                .types
                .resolve(self.serialization.as_ref(), body.type_tag, text),
        }
    }

    fn decode_builtin<T: Datagram>(&self, text: &str) -> Result<T> {
        let value = self.serialization.deserialize_from_text(text)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::compression::NoCompression;
    use crate::utils::crypto::ChaChaCryptography;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        message: String,
        count: u32,
    }

    impl Datagram for Greeting {
        const TYPE_TAG: &'static str = "test.greeting";
    }

    #[allow(clippy::unwrap_used)]
    fn codec() -> FrameCodec {
        let types = TypeRegistry::new();
        types.register::<Greeting>().unwrap();
        FrameCodec::new(types)
    }

    #[allow(clippy::panic)]
    fn expect_frame(decoded: Decoded) -> (Payload, usize) {
        match decoded {
            Decoded::Frame { payload, consumed } => (payload, consumed),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_datagram_roundtrip_all_provider_combinations() {
        let context = Context::detached(None);
        let greeting = Greeting {
            message: "hello".into(),
            count: 3,
        };

        let compressions: [Arc<dyn CompressionProvider>; 2] =
            [Arc::new(NoCompression), Arc::new(StandardCompression::default())];

        for compression in compressions {
            for cryptography in [
                None,
                Some(Arc::new(ChaChaCryptography::new([5u8; 32])) as Arc<dyn CryptographyProvider>),
            ] {
                let codec = codec()
                    .with_compression(compression.clone())
                    .with_cryptography(cryptography);
                let frame = codec.encode_datagram(&context, &greeting).unwrap();
                let (payload, consumed) = expect_frame(codec.decode(&context, &frame));
                assert_eq!(consumed, frame.len());
                assert_eq!(payload.downcast_ref::<Greeting>(), Some(&greeting));
            }
        }
    }

    #[test]
    #[allow(clippy::unwrap_used, clippy::panic)]
    fn test_bytes_passthrough_exact() {
        let context = Context::detached(None);
        let data: Vec<u8> = (0..=255).collect();
        let frame = codec().encode_bytes(&context, &data).unwrap();
        match expect_frame(codec().decode(&context, &frame)).0 {
            Payload::Bytes(bytes) => assert_eq!(bytes, data),
            other => panic!("expected bytes, got {other:?}"),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used, clippy::panic)]
    fn test_keep_alive_decodes_as_builtin() {
        let context = Context::detached(None);
        let frame = codec()
            .encode_datagram(&context, &KeepAlive { timestamp_ms: 77 })
            .unwrap();
        match expect_frame(codec().decode(&context, &frame)).0 {
            Payload::KeepAlive(ping) => assert_eq!(ping.timestamp_ms, 77),
            other => panic!("expected keep-alive, got {other:?}"),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_partial_frame_is_incomplete() {
        let context = Context::detached(None);
        let frame = codec().encode_bytes(&context, b"abcdef").unwrap();
        for cut in 0..frame.len() {
            assert!(matches!(
                codec().decode(&context, &frame[..cut]),
                Decoded::Incomplete
            ));
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_bad_delimiter_is_corrupt() {
        let context = Context::detached(None);
        let mut frame = codec().encode_bytes(&context, b"abcdef").unwrap();
        frame[0] ^= 0xFF;
        assert!(matches!(codec().decode(&context, &frame), Decoded::Corrupt));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_flipped_body_byte_is_corrupt() {
        let context = Context::detached(None);
        let frame = codec().encode_bytes(&context, b"abcdefgh").unwrap();
        for index in FRAME_HEADER_SIZE..frame.len() {
            let mut damaged = frame.clone();
            damaged[index] ^= 0x5A;
            assert!(matches!(codec().decode(&context, &damaged), Decoded::Corrupt));
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_undecodable_body_is_rejected_and_consumed() {
        let context = Context::detached(None);
        // valid checksum, but the body is not lz4 data
        let frame = frame::assemble(&[1, 2, 3]).unwrap();
        match codec().decode(&context, &frame) {
            Decoded::Rejected { consumed, .. } => assert_eq!(consumed, frame.len()),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used, clippy::panic)]
    fn test_unregistered_type_is_unresolved() {
        let context = Context::detached(None);
        let sender = codec();
        let frame = sender
            .encode_datagram(
                &context,
                &Greeting {
                    message: "x".into(),
                    count: 1,
                },
            )
            .unwrap();

        let receiver = FrameCodec::default();
        match expect_frame(receiver.decode(&context, &frame)).0 {
            Payload::Unresolved { type_tag, text } => {
                assert_eq!(type_tag, "test.greeting");
                assert!(text.contains("\"count\":1"));
            }
            other => panic!("expected unresolved, got {other:?}"),
        }
    }
}
