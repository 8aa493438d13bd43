//! # Protocol Layer
//!
//! Per-endpoint state and routing of decoded payloads.
//!
//! ## Components
//! - **Context**: one per remote endpoint, with keep-alive and provider overrides
//! - **Registry**: endpoint → context map plus the idle-eviction custodian
//! - **Dispatcher**: type-tag routing to registered handlers
//! - **Events**: error and keep-alive notifications
//!
//! ## Keep-Alive
//! Pings and replies are answered and measured here and never reach the
//! dispatcher.

pub mod context;
pub mod dispatcher;
pub mod events;
pub mod registry;
