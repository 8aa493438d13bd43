//! Out-of-band notifications: errors raised off the caller's stack and
//! keep-alive traffic that never reaches the dispatch table.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::ProtocolError;

/// Callback for errors raised by the receive task, handlers and timers.
pub type ErrorCallback = Arc<dyn Fn(Option<SocketAddr>, &ProtocolError) + Send + Sync>;

/// Callback for keep-alive traffic.
pub type KeepAliveCallback = Arc<dyn Fn(SocketAddr, KeepAliveEvent) + Send + Sync>;

/// Keep-alive traffic seen on a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveEvent {
    /// A ping arrived and was answered.
    Ping { timestamp_ms: u64 },
    /// A reply to one of our pings arrived.
    Pong { timestamp_ms: u64, rtt: Duration },
}

/// Fan-out point for out-of-band notifications.
#[derive(Default)]
pub struct EventHub {
    on_error: RwLock<Option<ErrorCallback>>,
    on_keep_alive: RwLock<Option<KeepAliveCallback>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error_callback(&self, callback: Option<ErrorCallback>) {
        if let Ok(mut slot) = self.on_error.write() {
            *slot = callback;
        }
    }

    pub fn set_keep_alive_callback(&self, callback: Option<KeepAliveCallback>) {
        if let Ok(mut slot) = self.on_keep_alive.write() {
            *slot = callback;
        }
    }

    /// Log `err` and hand it to the error callback, if any.
    pub fn report(&self, peer: Option<SocketAddr>, err: &ProtocolError) {
        match err {
            ProtocolError::BufferOverflow(_) | ProtocolError::HandlerFailure { .. } => {
                warn!(peer = ?peer, error = %err, "Messenger error")
            }
            _ => error!(peer = ?peer, error = %err, "Messenger error"),
        }

        let callback = self.on_error.read().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(peer, err);
        }
    }

    pub fn keep_alive(&self, peer: SocketAddr, event: KeepAliveEvent) {
        debug!(peer = %peer, event = ?event, "Keep-alive");
        let callback = self.on_keep_alive.read().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(peer, event);
        }
    }
}
