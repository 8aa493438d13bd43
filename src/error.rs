//! # Error Types
//!
//! Error handling for the datagram messenger.
//!
//! This module defines every error variant that can occur while framing,
//! sending, receiving and dispatching datagrams.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures and address resolution
//! - **Framing Errors**: invalid headers, buffer overflow, rejected frames
//! - **Provider Errors**: serialization, compression and cryptography failures
//! - **Dispatch Errors**: duplicate or reserved registrations, handler failures
//! - **Configuration Errors**: missing endpoint, missing socket, invalid settings
//!
//! Corrupt frames are never reported as errors: the reassembly buffer
//! resynchronizes on the next frame delimiter and moves on.
//!
//! ## Example Usage
//! ```rust
//! use datagram_messenger::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn parse_port(text: &str) -> Result<u16> {
//!     text.parse::<u16>()
//!         .map_err(|e| ProtocolError::ConfigError(format!("invalid port: {e}")))
//! }
//!
//! match parse_port("9000") {
//!     Ok(port) => info!(port, "Port parsed"),
//!     Err(e) => error!(error = %e, "Bad port"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Registry-related error messages
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire lock on context registry";
    pub const ERR_PROVIDER_LOCK: &str = "Failed to acquire lock on provider set";

    /// Socket errors
    pub const ERR_ALREADY_LISTENING: &str = "Messenger is already receiving on a socket";
    pub const ERR_STATE_LOCK: &str = "Failed to acquire lock on messenger state";

    /// Time errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// Primary error type for all messenger operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Text serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Frame buffer overflow: {0} bytes exceeds the maximum buffer size")]
    BufferOverflow(usize),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("A handler is already registered for datagram type [{0}]")]
    DuplicateHandler(String),

    #[error("Datagram type [{0}] is reserved and cannot be registered")]
    ReservedType(String),

    #[error("Handler for [{type_tag}] failed: {message}")]
    HandlerFailure { type_tag: String, message: String },

    #[error("The UDP endpoint has not been defined")]
    NoEndpoint,

    #[error("The UDP socket has not been initialized")]
    SocketNotInitialized,

    #[error("Could not resolve address: {0}")]
    AddressResolution(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Build a handler failure from anything displayable.
    pub fn handler(type_tag: &str, message: impl std::fmt::Display) -> Self {
        ProtocolError::HandlerFailure {
            type_tag: type_tag.to_string(),
            message: message.to_string(),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
