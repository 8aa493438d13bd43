//! # Datagram Messenger
//!
//! Framed, checksummed, best-effort messaging over UDP.
//!
//! Every message travels as a self-contained frame with a fixed delimiter,
//! its size and a CRC-16 of its body. Frames may be split across datagrams or
//! batched into one; the receiver reassembles them, drops damaged frames and
//! resynchronizes on the next delimiter.
//!
//! ## Features
//! - Typed datagrams routed to handlers by a stable type tag
//! - Raw byte payloads with no serialization
//! - Pluggable serialization, compression (LZ4 by default) and encryption
//! - One context per remote endpoint with keep-alive, RTT and idle eviction
//!
//! ## Non-goals
//! Delivery, ordering and flow control are left to the application.
//!
//! ## Layout
//! - [`core`]: wire format, codec, payload model, reassembly
//! - [`protocol`]: contexts, registry, dispatcher, notifications
//! - [`transport`]: the [`Messenger`] and its receive loop
//! - [`utils`]: compression, cryptography, logging, metrics, time

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::MessengerConfig;
pub use crate::core::payload::{Datagram, KeepAlive, KeepAliveReply, Payload, TypedDatagram};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::context::Context;
pub use crate::protocol::dispatcher::DatagramHandler;
pub use crate::protocol::events::KeepAliveEvent;
pub use crate::transport::Messenger;
