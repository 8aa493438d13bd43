//! # Frame Wire Format
//!
//! A frame is one self-contained, checksummed unit on the wire:
//!
//! ```text
//! [Delimiter(4)] [GrossSize(4)] [CRC16(2)] [Body(N)]
//! ```
//!
//! - **Delimiter**: [`FRAME_DELIMITER`] as a little-endian i32
//! - **GrossSize**: header plus body length, little-endian i32
//! - **CRC16**: CRC-16/ARC of the body only, little-endian u16
//! - **Body**: bincode-encoded [`FrameBody`], compressed and optionally encrypted
//!
//! Integer widths and byte order are fixed regardless of host architecture.

use serde::{Deserialize, Serialize};

use crate::config::{BYTES_TYPE_TAG, FRAME_DELIMITER, FRAME_HEADER_SIZE};
use crate::core::crc16;
use crate::error::{ProtocolError, Result};

/// Little-endian bytes of [`FRAME_DELIMITER`].
pub const DELIMITER_BYTES: [u8; 4] = FRAME_DELIMITER.to_le_bytes();

/// Logical content of a frame before it is compressed and checksummed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBody {
    /// Routing key of the payload, or the raw-bytes sentinel
    pub type_tag: String,
    /// Serialized payload text (UTF-8) or raw bytes
    pub payload_bytes: Vec<u8>,
}

impl FrameBody {
    /// Body carrying raw bytes that skip object serialization.
    pub fn bytes(data: &[u8]) -> Self {
        Self {
            type_tag: BYTES_TYPE_TAG.to_string(),
            payload_bytes: data.to_vec(),
        }
    }

    /// Body carrying serialized text for `type_tag`.
    pub fn text(type_tag: &str, text: String) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            payload_bytes: text.into_bytes(),
        }
    }

    pub fn is_bytes(&self) -> bool {
        self.type_tag == BYTES_TYPE_TAG
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Fixed-size header at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub delimiter: i32,
    pub gross_size: i32,
    pub crc: u16,
}

impl FrameHeader {
    /// Read a header from the start of `buf`; `None` until enough bytes arrive.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            delimiter: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            gross_size: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            crc: u16::from_le_bytes([buf[8], buf[9]]),
        })
    }

    /// Delimiter matches and the size can hold at least the header.
    pub fn is_plausible(&self) -> bool {
        self.delimiter == FRAME_DELIMITER && self.gross_size >= FRAME_HEADER_SIZE as i32
    }
}

/// Wrap an already compressed/encrypted body in a frame header.
pub fn assemble(body: &[u8]) -> Result<Vec<u8>> {
    let gross_size = body.len() + FRAME_HEADER_SIZE;
    let gross_size_i32 =
        i32::try_from(gross_size).map_err(|_| ProtocolError::BufferOverflow(gross_size))?;

    let mut frame = Vec::with_capacity(gross_size);
    frame.extend_from_slice(&DELIMITER_BYTES);
    frame.extend_from_slice(&gross_size_i32.to_le_bytes());
    frame.extend_from_slice(&crc16::checksum(body).to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Offset of the next delimiter at or after `from`.
pub fn find_delimiter(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < DELIMITER_BYTES.len() || from > buf.len() - DELIMITER_BYTES.len() {
        return None;
    }
    buf[from..]
        .windows(DELIMITER_BYTES.len())
        .position(|window| window == DELIMITER_BYTES)
        .map(|pos| pos + from)
}
