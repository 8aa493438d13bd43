//! # Connection Context
//!
//! One [`Context`] exists per remote endpoint. It carries what the messenger
//! knows about that peer: when it was last heard from, the last
//! measured round-trip time, optional provider overrides and the keep-alive
//! task that holds NAT mappings open.
//!
//! Contexts are created by the [`ContextRegistry`](crate::protocol::registry::ContextRegistry)
//! and handed to handlers, which can reply through them.
//!
//! ## Provider resolution
//! For every encode and decode: context override, then messenger default,
//! then the built-in provider (JSON, LZ4, no encryption).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::config::DEFAULT_KEEPALIVE_INTERVAL;
use crate::core::codec::FrameCodec;
use crate::core::payload::{Datagram, KeepAlive, KeepAliveReply, TypeRegistry};
use crate::core::serialization::{JsonSerialization, SerializationProvider};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::events::{EventHub, KeepAliveEvent};
use crate::utils::compression::{CompressionProvider, StandardCompression};
use crate::utils::crypto::CryptographyProvider;
use crate::utils::metrics::Metrics;
use crate::utils::time;

/// Socket shared by every context of one messenger run. Emptied when the
/// messenger stops, so contexts held elsewhere can no longer send.
pub(crate) type SocketSlot = Arc<RwLock<Option<Arc<UdpSocket>>>>;

/// Optional provider choices at one level of the resolution chain.
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub serialization: Option<Arc<dyn SerializationProvider>>,
    pub compression: Option<Arc<dyn CompressionProvider>>,
    pub cryptography: Option<Arc<dyn CryptographyProvider>>,
}

/// State shared by a messenger and all of its contexts.
pub(crate) struct Environment {
    pub(crate) defaults: RwLock<ProviderSet>,
    pub(crate) types: TypeRegistry,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) events: EventHub,
    /// Parent of every keep-alive token; cancelled when the messenger stops.
    pub(crate) shutdown: CancellationToken,
    pub(crate) keep_alive_interval: Duration,
}

impl Environment {
    pub(crate) fn new(keep_alive_interval: Duration) -> Self {
        Self {
            defaults: RwLock::new(ProviderSet::default()),
            types: TypeRegistry::new(),
            metrics: Arc::new(Metrics::new()),
            events: EventHub::new(),
            shutdown: CancellationToken::new(),
            keep_alive_interval,
        }
    }
}

/// Per-endpoint connection state.
pub struct Context {
    endpoint: Option<SocketAddr>,
    socket: SocketSlot,
    env: Arc<Environment>,
    overrides: RwLock<ProviderSet>,
    last_activity: AtomicU64,
    rtt: Mutex<Option<Duration>>,
    keep_alive: Mutex<Option<CancellationToken>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("endpoint", &self.endpoint)
            .field("last_activity", &self.last_activity())
            .field("rtt", &self.rtt())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(
        endpoint: SocketAddr,
        socket: SocketSlot,
        env: Arc<Environment>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint),
            socket,
            env,
            overrides: RwLock::new(ProviderSet::default()),
            last_activity: AtomicU64::new(time::now_millis()),
            rtt: Mutex::new(None),
            keep_alive: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// A context with no socket and default providers.
    ///
    /// Useful for encoding and decoding frames outside a messenger; any
    /// attempt to send through it fails with `SocketNotInitialized`.
    pub fn detached(endpoint: Option<SocketAddr>) -> Self {
        Self {
            endpoint,
            socket: SocketSlot::default(),
            env: Arc::new(Environment::new(DEFAULT_KEEPALIVE_INTERVAL)),
            overrides: RwLock::new(ProviderSet::default()),
            last_activity: AtomicU64::new(time::now_millis()),
            rtt: Mutex::new(None),
            keep_alive: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Remote endpoint this context talks to.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// UTC milliseconds of the last frame received from the peer, or of
    /// creation if nothing has arrived yet.
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Record inbound activity. Outbound traffic (including our own
    /// keep-alive pings) does not count, so a silent peer still expires.
    pub fn touch(&self) {
        self.last_activity
            .store(time::now_millis(), Ordering::Relaxed);
    }

    /// Whether the peer has been silent for longer than `max_idle`.
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        time::is_expired(self.last_activity(), max_idle)
    }

    /// Round-trip time measured by the last keep-alive reply.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt.lock().ok().and_then(|rtt| *rtt)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn set_serialization_provider(&self, provider: Arc<dyn SerializationProvider>) {
        self.update_overrides(|set| set.serialization = Some(provider));
    }

    pub fn set_compression_provider(&self, provider: Arc<dyn CompressionProvider>) {
        self.update_overrides(|set| set.compression = Some(provider));
    }

    pub fn set_cryptography_provider(&self, provider: Arc<dyn CryptographyProvider>) {
        self.update_overrides(|set| set.cryptography = Some(provider));
    }

    /// Drop every override so the messenger defaults apply again.
    pub fn clear_providers(&self) {
        self.update_overrides(|set| *set = ProviderSet::default());
    }

    fn update_overrides(&self, apply: impl FnOnce(&mut ProviderSet)) {
        if let Ok(mut set) = self.overrides.write() {
            apply(&mut set);
        }
    }

    /// Codec with this context's providers resolved.
    pub fn codec(&self) -> Result<FrameCodec> {
        let lock_err = || ProtocolError::Custom(constants::ERR_PROVIDER_LOCK.to_string());
        let overrides = self.overrides.read().map_err(|_| lock_err())?;
        let defaults = self.env.defaults.read().map_err(|_| lock_err())?;

        let serialization = overrides
            .serialization
            .clone()
            .or_else(|| defaults.serialization.clone())
            .unwrap_or_else(|| Arc::new(JsonSerialization));
        let compression = overrides
            .compression
            .clone()
            .or_else(|| defaults.compression.clone())
            .unwrap_or_else(|| Arc::new(StandardCompression::default()));
        let cryptography = overrides
            .cryptography
            .clone()
            .or_else(|| defaults.cryptography.clone());

        Ok(FrameCodec::new(self.env.types.clone())
            .with_serialization(serialization)
            .with_compression(compression)
            .with_cryptography(cryptography))
    }

    /// Send a datagram to this context's endpoint.
    pub async fn dispatch<T: Datagram>(&self, datagram: &T) -> Result<()> {
        let target = self.target()?;
        let frame = self.codec()?.encode_datagram(self, datagram)?;
        self.send_frame(target, &frame).await
    }

    /// Send raw bytes to this context's endpoint.
    pub async fn dispatch_bytes(&self, data: &[u8]) -> Result<()> {
        let target = self.target()?;
        let frame = self.codec()?.encode_bytes(self, data)?;
        self.send_frame(target, &frame).await
    }

    /// Send a datagram to another endpoint over the same socket, encoded with
    /// this context's providers.
    pub async fn dispatch_to<T: Datagram>(&self, target: SocketAddr, datagram: &T) -> Result<()> {
        self.socket()?;
        let frame = self.codec()?.encode_datagram(self, datagram)?;
        self.send_frame(target, &frame).await
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))?
            .clone()
            .ok_or(ProtocolError::SocketNotInitialized)
    }

    fn target(&self) -> Result<SocketAddr> {
        self.socket()?;
        self.endpoint.ok_or(ProtocolError::NoEndpoint)
    }

    async fn send_frame(&self, target: SocketAddr, frame: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        let sent = socket.send_to(frame, target).await?;
        trace!(peer = %target, bytes = sent, "Frame sent");
        self.env.metrics.frame_sent(sent as u64);
        Ok(())
    }

    /// Start sending keep-alive pings every `interval`.
    ///
    /// A no-op while a keep-alive task is already running. Requires a Tokio
    /// runtime.
    pub fn start_keep_alive(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let endpoint = self.target()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProtocolError::Custom(format!("keep-alive needs a Tokio runtime: {e}")))?;

        let mut slot = self
            .keep_alive
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))?;
        if slot.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Ok(());
        }

        let token = self.env.shutdown.child_token();
        *slot = Some(token.clone());
        drop(slot);

        debug!(peer = %endpoint, interval_ms = interval.as_millis() as u64, "Starting keep-alive");
        runtime.spawn(keep_alive_loop(Arc::downgrade(self), interval, token));
        Ok(())
    }

    /// Start keep-alive with the messenger's configured interval.
    pub(crate) fn start_default_keep_alive(self: &Arc<Self>) -> Result<()> {
        self.start_keep_alive(self.env.keep_alive_interval)
    }

    /// Cancel the keep-alive task, if any.
    pub fn stop_keep_alive(&self) {
        if let Ok(mut slot) = self.keep_alive.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }

    pub fn is_keep_alive_running(&self) -> bool {
        self.keep_alive
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|token| !token.is_cancelled()))
            .unwrap_or(false)
    }

    /// Stop keep-alive and mark the context for removal.
    pub fn shutdown(&self) {
        self.stop_keep_alive();
        self.shut_down.store(true, Ordering::Release);
    }

    async fn send_keep_alive(&self) -> Result<()> {
        let ping = KeepAlive {
            timestamp_ms: time::current_timestamp_millis()?,
        };
        self.dispatch(&ping).await?;
        self.env.metrics.keepalive_sent();
        Ok(())
    }

    /// Answer a ping by echoing its timestamp.
    #[instrument(skip(self), fields(peer = ?self.endpoint))]
    pub(crate) async fn answer_ping(&self, ping: KeepAlive) -> Result<()> {
        self.dispatch(&KeepAliveReply {
            timestamp_ms: ping.timestamp_ms,
        })
        .await?;
        self.env.metrics.keepalive_replied();
        if let Some(peer) = self.endpoint {
            self.env.events.keep_alive(
                peer,
                KeepAliveEvent::Ping {
                    timestamp_ms: ping.timestamp_ms,
                },
            );
        }
        Ok(())
    }

    /// Record the round-trip time carried by a reply.
    pub(crate) fn record_pong(&self, reply: KeepAliveReply) -> Duration {
        let rtt = time::elapsed_since(reply.timestamp_ms);
        if let Ok(mut slot) = self.rtt.lock() {
            *slot = Some(rtt);
        }
        if let Some(peer) = self.endpoint {
            self.env.events.keep_alive(
                peer,
                KeepAliveEvent::Pong {
                    timestamp_ms: reply.timestamp_ms,
                    rtt,
                },
            );
        }
        rtt
    }

    pub(crate) fn report(&self, err: &ProtocolError) {
        self.env.events.report(self.endpoint, err);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.stop_keep_alive();
    }
}

async fn keep_alive_loop(context: Weak<Context>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(context) = context.upgrade() else { break };
                if let Err(e) = context.send_keep_alive().await {
                    context.report(&e);
                }
            }
        }
    }
    trace!("Keep-alive task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::Decoded;
    use crate::core::payload::Payload;
    use crate::utils::compression::NoCompression;

    #[tokio::test]
    async fn test_detached_dispatch_fails() {
        let context = Context::detached(None);
        let result = context.dispatch_bytes(b"nowhere").await;
        assert!(matches!(result, Err(ProtocolError::SocketNotInitialized)));
    }

    #[test]
    fn test_detached_starts_fresh() {
        let context = Context::detached(Some(([127, 0, 0, 1], 4000).into()));
        assert!(context.rtt().is_none());
        assert!(!context.is_shut_down());
        assert!(!context.is_idle(Duration::from_secs(60)));
        assert!(!context.is_keep_alive_running());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_override_beats_default() {
        let context = Context::detached(None);
        context.env.defaults.write().unwrap().compression =
            Some(Arc::new(StandardCompression::default()));
        context.set_compression_provider(Arc::new(NoCompression));

        let frame = context.codec().unwrap().encode_bytes(&context, b"plain").unwrap();
        // uncompressed bincode keeps the payload visible
        assert!(frame.windows(5).any(|w| w == b"plain"));

        context.clear_providers();
        let frame = context.codec().unwrap().encode_bytes(&context, b"plain").unwrap();
        assert!(matches!(
            context.codec().unwrap().decode(&context, &frame),
            Decoded::Frame { payload: Payload::Bytes(ref b), .. } if b == b"plain"
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_messenger_default_applies_without_override() {
        let context = Context::detached(None);
        context.env.defaults.write().unwrap().compression = Some(Arc::new(NoCompression));

        let codec = context.codec().unwrap();
        let frame = codec.encode_bytes(&context, b"visible").unwrap();
        assert!(frame.windows(7).any(|w| w == b"visible"));
        assert!(matches!(
            codec.decode(&context, &frame),
            Decoded::Frame { payload: Payload::Bytes(_), .. }
        ));
    }

    #[test]
    fn test_record_pong_sets_rtt() {
        let context = Context::detached(None);
        let rtt = context.record_pong(KeepAliveReply {
            timestamp_ms: time::now_millis() - 40,
        });
        assert!(rtt >= Duration::from_millis(40));
        assert_eq!(context.rtt(), Some(rtt));
    }

    #[test]
    fn test_future_pong_saturates_to_zero() {
        let context = Context::detached(None);
        let rtt = context.record_pong(KeepAliveReply {
            timestamp_ms: time::now_millis() + 10_000,
        });
        assert_eq!(rtt, Duration::ZERO);
    }

    #[test]
    fn test_shutdown_marks_context() {
        let context = Context::detached(None);
        context.shutdown();
        assert!(context.is_shut_down());
    }
}
