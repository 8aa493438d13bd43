//! # Frame Body Compression
//!
//! Every frame body is compressed before it is (optionally) encrypted and
//! checksummed. The default provider uses LZ4; Zstd is available for
//! bandwidth-constrained links and [`NoCompression`] passes bytes through.
//!
//! ## Security
//! - Decompression output is capped at [`MAX_DECOMPRESSION_SIZE`] so a tiny
//!   frame cannot claim a multi-gigabyte body

use crate::error::{ProtocolError, Result};
use crate::protocol::context::Context;

/// Maximum output size for decompression
pub const MAX_DECOMPRESSION_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

/// Compression applied to serialized frame bodies.
pub trait CompressionProvider: Send + Sync {
    /// Compress a frame body before it is sent.
    fn compress(&self, context: &Context, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a frame body after it is received.
    fn decompress(&self, context: &Context, data: &[u8]) -> Result<Vec<u8>>;
}

/// Built-in compression using one of the supported algorithms.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCompression {
    pub kind: CompressionKind,
}

impl StandardCompression {
    pub fn new(kind: CompressionKind) -> Self {
        Self { kind }
    }
}

impl CompressionProvider for StandardCompression {
    fn compress(&self, _context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        compress(data, &self.kind)
    }

    fn decompress(&self, _context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        decompress(data, &self.kind)
    }
}

/// Identity provider; the body goes out exactly as serialized.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl CompressionProvider for NoCompression {
    fn compress(&self, _context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, _context: &Context, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds MAX_DECOMPRESSION_SIZE
pub fn decompress(data: &[u8], kind: &CompressionKind) -> Result<Vec<u8>> {
    match *kind {
        CompressionKind::Lz4 => {
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }

            // lz4_flex prepends the uncompressed size as 4 little-endian bytes
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }

            lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            use std::io::Read;

            let mut out = Vec::new();
            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > MAX_DECOMPRESSION_SIZE {
                            return Err(ProtocolError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}
