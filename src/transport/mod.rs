//! # Transport Layer
//!
//! UDP socket ownership and the receive loop.
//!
//! ## Components
//! - **Messenger**: binds the socket, runs the receive task and the custodian,
//!   and exposes the send and registration API
//!
//! ## Socket Errors
//! ICMP feedback from earlier sends (connection reset or refused) surfaces
//! on the next read on some platforms. The receive loop logs it and keeps
//! reading.

pub mod messenger;

pub use messenger::{resolve_endpoint, Messenger};
