//! # Core Framing Components
//!
//! Wire format, checksums, payload model and frame reassembly.
//!
//! ## Components
//! - **CRC16**: CRC-16/ARC checksum over frame bodies
//! - **Frame**: header layout and the bincode-encoded frame body
//! - **Codec**: payload ↔ frame, running serialization, compression and encryption
//! - **Payload**: the `Datagram` trait, keep-alive types and the type registry
//! - **Frame Buffer**: reassembly of fragmented and batched datagrams
//!
//! ## Wire Format
//! ```text
//! [Delimiter(4)] [GrossSize(4)] [CRC16(2)] [Body(N)]
//! ```
//!
//! ## Robustness
//! - Checksum mismatches resynchronize on the next delimiter
//! - The reassembly buffer has a hard maximum size
//! - Decompression output is bounded

pub mod codec;
pub mod crc16;
pub mod frame;
pub mod frame_buffer;
pub mod payload;
pub mod serialization;
