//! # Utility Modules
//!
//! Supporting utilities for compression, cryptography, logging, metrics and time.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with decompression size limits
//! - **Crypto**: XChaCha20-Poly1305 AEAD encryption of frame bodies
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Millisecond timestamps for keep-alive and expiry checks
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Decompression bomb protection (16MB limit)
//! - Memory zeroing for key material (zeroize crate)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{Metrics, MetricsSnapshot};
