//! # Messenger
//!
//! The public face of the crate: one UDP socket, one receive task, one
//! context registry with its custodian, and one dispatch table.
//!
//! ## Server
//! ```rust,no_run
//! use datagram_messenger::{Datagram, Messenger, MessengerConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Chat {
//!     text: String,
//! }
//!
//! impl Datagram for Chat {
//!     const TYPE_TAG: &'static str = "example.chat";
//! }
//!
//! # async fn run() -> datagram_messenger::Result<()> {
//! let messenger = Messenger::new(MessengerConfig::default())?;
//! messenger.register_with_context(|context, chat: Chat| async move {
//!     context.dispatch(&chat).await
//! })?;
//! messenger.listen(9000).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Client
//! ```rust,no_run
//! # use datagram_messenger::{Messenger, MessengerConfig};
//! # async fn run() -> datagram_messenger::Result<()> {
//! let messenger = Messenger::new(MessengerConfig::default())?;
//! messenger.connect("localhost", 9000).await?;
//! messenger.dispatch_bytes(b"hello").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery
//! Best effort only: no acknowledgement, ordering or retransmission.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{BufferConfig, MessengerConfig};
use crate::core::frame_buffer::FrameBuffer;
use crate::core::payload::{Datagram, Payload};
use crate::core::serialization::SerializationProvider;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::context::{Context, Environment, ProviderSet};
use crate::protocol::dispatcher::{DatagramHandler, Dispatcher, Routed};
use crate::protocol::events::KeepAliveEvent;
use crate::protocol::registry::ContextRegistry;
use crate::utils::compression::CompressionProvider;
use crate::utils::crypto::CryptographyProvider;
use crate::utils::metrics::MetricsSnapshot;

/// Pause after an unexpected socket error before reading again
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// A background task and the token that stops it.
struct Task {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Task {
    async fn stop(self, name: &'static str) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    socket: Option<Arc<UdpSocket>>,
    default_endpoint: Option<SocketAddr>,
    receiver: Option<Task>,
    custodian: Option<Task>,
}

/// Framed, typed messaging over a single UDP socket.
pub struct Messenger {
    config: MessengerConfig,
    env: Arc<Environment>,
    registry: Arc<ContextRegistry>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<RuntimeState>,
}

impl Messenger {
    /// Create a messenger. No socket is opened until `listen` or `connect`.
    pub fn new(config: MessengerConfig) -> Result<Self> {
        config.validate_strict()?;

        let env = Arc::new(Environment::new(config.keep_alive.interval));
        let registry = Arc::new(ContextRegistry::new(env.clone(), config.keep_alive.clone()));
        let dispatcher = Arc::new(Dispatcher::new(env.types.clone()));

        Ok(Self {
            config,
            env,
            registry,
            dispatcher,
            state: Mutex::new(RuntimeState::default()),
        })
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, RuntimeState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_STATE_LOCK.to_string()))
    }

    /// Handle datagrams of type `T`.
    pub fn register<T, F, Fut>(&self, handler: F) -> Result<()>
    where
        T: Datagram,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.register(handler)
    }

    /// Handle datagrams of type `T` with access to the sender's context.
    pub fn register_with_context<T, F, Fut>(&self, handler: F) -> Result<()>
    where
        T: Datagram,
        F: Fn(Arc<Context>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatcher.register_with_context(handler)
    }

    /// Handle datagrams of type `T` with a handler instance.
    pub fn add_handler<T, H>(&self, handler: Arc<H>) -> Result<()>
    where
        T: Datagram,
        H: DatagramHandler<T>,
    {
        self.dispatcher.add_handler(handler)
    }

    /// Called for raw bytes and for datagrams with no bound handler. Runs
    /// under the same dispatch mode as handlers, with panics reported.
    pub fn on_datagram<F>(&self, callback: F)
    where
        F: Fn(Arc<Context>, Payload) + Send + Sync + 'static,
    {
        self.dispatcher.set_fallback(Some(Arc::new(callback)));
    }

    /// Called for errors raised off the caller's stack.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(Option<SocketAddr>, &ProtocolError) + Send + Sync + 'static,
    {
        self.env.events.set_error_callback(Some(Arc::new(callback)));
    }

    /// Called for every keep-alive ping answered and reply received.
    pub fn on_keep_alive<F>(&self, callback: F)
    where
        F: Fn(SocketAddr, KeepAliveEvent) + Send + Sync + 'static,
    {
        self.env.events.set_keep_alive_callback(Some(Arc::new(callback)));
    }

    fn update_defaults(&self, apply: impl FnOnce(&mut ProviderSet)) {
        if let Ok(mut defaults) = self.env.defaults.write() {
            apply(&mut defaults);
        }
    }

    pub fn set_serialization_provider(&self, provider: Arc<dyn SerializationProvider>) {
        self.update_defaults(|set| set.serialization = Some(provider));
    }

    pub fn clear_serialization_provider(&self) {
        self.update_defaults(|set| set.serialization = None);
    }

    pub fn set_compression_provider(&self, provider: Arc<dyn CompressionProvider>) {
        self.update_defaults(|set| set.compression = Some(provider));
    }

    pub fn clear_compression_provider(&self) {
        self.update_defaults(|set| set.compression = None);
    }

    pub fn set_cryptography_provider(&self, provider: Arc<dyn CryptographyProvider>) {
        self.update_defaults(|set| set.cryptography = Some(provider));
    }

    pub fn clear_cryptography_provider(&self) {
        self.update_defaults(|set| set.cryptography = None);
    }

    /// Bind `0.0.0.0:port` and start receiving. Every peer that sends to this
    /// socket gets a context with keep-alive running.
    #[instrument(skip(self))]
    pub async fn listen(&self, port: u16) -> Result<SocketAddr> {
        if self.state()?.socket.is_some() {
            return Err(ProtocolError::ConfigError(constants::ERR_ALREADY_LISTENING.to_string()));
        }

        let socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?);
        let local = socket.local_addr()?;

        {
            let mut state = self.state()?;
            if state.socket.is_some() {
                return Err(ProtocolError::ConfigError(
                    constants::ERR_ALREADY_LISTENING.to_string(),
                ));
            }
            self.registry.set_listening(true);
            self.start_background(&mut state, socket);
        }

        info!(local = %local, "Listening");
        Ok(local)
    }

    /// Resolve `host` and make it the default endpoint. Binds an ephemeral
    /// socket first if none is open.
    #[instrument(skip(self))]
    pub async fn connect(&self, host: &str, port: u16) -> Result<Arc<Context>> {
        let endpoint = resolve_endpoint(host, port).await?;

        let existing = self.state()?.socket.clone();
        let socket = match existing {
            Some(socket) => socket,
            None => {
                let bind_addr: SocketAddr = if endpoint.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                Arc::new(UdpSocket::bind(bind_addr).await?)
            }
        };

        {
            let mut state = self.state()?;
            if state.socket.is_none() {
                self.start_background(&mut state, socket);
            }
            state.default_endpoint = Some(endpoint);
        }

        let context = self.registry.get_or_create(endpoint)?;
        info!(peer = %endpoint, "Connected");
        Ok(context)
    }

    fn start_background(&self, state: &mut RuntimeState, socket: Arc<UdpSocket>) {
        self.registry.attach_socket(socket.clone());

        let receiver_token = self.env.shutdown.child_token();
        let receiver = Receiver {
            socket: socket.clone(),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            env: self.env.clone(),
            buffer: self.config.buffer.clone(),
            asynchronous: self.config.dispatch.asynchronous,
        };
        state.receiver = Some(Task {
            handle: tokio::spawn(receiver.run(receiver_token.clone())),
            token: receiver_token,
        });

        let custodian_token = self.env.shutdown.child_token();
        state.custodian = Some(Task {
            handle: self.registry.start_custodian(custodian_token.clone()),
            token: custodian_token,
        });

        state.socket = Some(socket);
    }

    /// Stop receiving, cancel every keep-alive and the custodian, and close
    /// the socket. The messenger can listen or connect again afterwards.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let (receiver, custodian, socket) = match self.state() {
            Ok(mut state) => {
                state.default_endpoint = None;
                (state.receiver.take(), state.custodian.take(), state.socket.take())
            }
            Err(e) => {
                self.env.events.report(None, &e);
                (None, None, None)
            }
        };

        if let Some(receiver) = receiver {
            receiver.stop("receiver").await;
        }

        self.registry.shutdown_all();
        if let Some(custodian) = custodian {
            custodian.stop("custodian").await;
        }

        self.registry.set_listening(false);
        self.registry.detach_socket();
        drop(socket);

        self.env.metrics.log_summary();
        info!("Messenger stopped");
    }

    fn default_endpoint(&self) -> Result<SocketAddr> {
        let state = self.state()?;
        if state.socket.is_none() {
            return Err(ProtocolError::SocketNotInitialized);
        }
        state.default_endpoint.ok_or(ProtocolError::NoEndpoint)
    }

    fn socket_ready(&self) -> Result<()> {
        if self.state()?.socket.is_none() {
            return Err(ProtocolError::SocketNotInitialized);
        }
        Ok(())
    }

    /// Send to the endpoint given to `connect`.
    pub async fn dispatch<T: Datagram>(&self, datagram: &T) -> Result<()> {
        let endpoint = self.default_endpoint()?;
        self.dispatch_to(endpoint, datagram).await
    }

    /// Send raw bytes to the endpoint given to `connect`.
    pub async fn dispatch_bytes(&self, data: &[u8]) -> Result<()> {
        let endpoint = self.default_endpoint()?;
        self.dispatch_bytes_to(endpoint, data).await
    }

    pub async fn dispatch_to<T: Datagram>(&self, endpoint: SocketAddr, datagram: &T) -> Result<()> {
        self.socket_ready()?;
        self.registry.get_or_create(endpoint)?.dispatch(datagram).await
    }

    pub async fn dispatch_bytes_to(&self, endpoint: SocketAddr, data: &[u8]) -> Result<()> {
        self.socket_ready()?;
        self.registry.get_or_create(endpoint)?.dispatch_bytes(data).await
    }

    /// Resolve `host` for this call only and send to it.
    pub async fn dispatch_to_host<T: Datagram>(
        &self,
        host: &str,
        port: u16,
        datagram: &T,
    ) -> Result<()> {
        let endpoint = resolve_endpoint(host, port).await?;
        self.dispatch_to(endpoint, datagram).await
    }

    pub async fn dispatch_bytes_to_host(&self, host: &str, port: u16, data: &[u8]) -> Result<()> {
        let endpoint = resolve_endpoint(host, port).await?;
        self.dispatch_bytes_to(endpoint, data).await
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state()
            .ok()
            .and_then(|state| state.socket.as_ref().and_then(|s| s.local_addr().ok()))
    }

    pub fn is_listening(&self) -> bool {
        self.registry.is_listening()
    }

    /// Context for `endpoint` without creating one.
    pub fn context(&self, endpoint: SocketAddr) -> Option<Arc<Context>> {
        self.registry.get(endpoint)
    }

    /// Number of tracked endpoints.
    pub fn contexts(&self) -> usize {
        self.registry.len()
    }

    /// Run a custodian sweep now. Returns the number of evicted contexts.
    pub fn sweep(&self) -> usize {
        self.registry.sweep()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.env.metrics.snapshot()
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        self.env.shutdown.cancel();
        self.registry.shutdown_all();
    }
}

/// Resolve `host`, preferring an IPv4 address over IPv6.
pub async fn resolve_endpoint(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProtocolError::AddressResolution(format!("{host}: {e}")))?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.iter().find(|addr| addr.is_ipv6()))
        .copied()
        .ok_or_else(|| ProtocolError::AddressResolution(format!("{host}: no addresses")))
}

/// Errors a UDP socket reports for ICMP feedback from earlier sends.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

/// State owned by the receive task.
struct Receiver {
    socket: Arc<UdpSocket>,
    registry: Arc<ContextRegistry>,
    dispatcher: Arc<Dispatcher>,
    env: Arc<Environment>,
    buffer: BufferConfig,
    asynchronous: bool,
}

impl Receiver {
    async fn run(self, token: CancellationToken) {
        let mut buffer = FrameBuffer::new(&self.buffer).with_metrics(self.env.metrics.clone());

        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = self.socket.recv_from(buffer.recv_buffer_mut()) => received,
            };

            match received {
                Ok((n, peer)) => {
                    trace!(peer = %peer, bytes = n, "Datagram received");
                    self.env.metrics.bytes_read(n as u64);
                    self.receive(&mut buffer, n, peer).await;
                }
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "Ignoring ICMP feedback on socket");
                }
                Err(e) => {
                    self.env.events.report(None, &ProtocolError::Io(e));
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }

        debug!("Receive task finished");
    }

    async fn receive(&self, buffer: &mut FrameBuffer, n: usize, peer: SocketAddr) {
        let context = match self.registry.get_or_create(peer) {
            Ok(context) => context,
            Err(e) => return self.env.events.report(Some(peer), &e),
        };

        if let Err(e) = buffer.commit_read(n) {
            return context.report(&e);
        }

        let codec = match context.codec() {
            Ok(codec) => codec,
            Err(e) => return context.report(&e),
        };

        for item in buffer.extract_frames(&codec, &context) {
            match item {
                Ok(payload) => {
                    self.env.metrics.frame_received();
                    context.touch();
                    self.deliver(&context, payload).await;
                }
                Err(e) => {
                    self.env.metrics.rejected_frame();
                    context.report(&e);
                }
            }
        }
    }

    async fn deliver(&self, context: &Arc<Context>, payload: Payload) {
        match &payload {
            Payload::KeepAlive(ping) => {
                if let Err(e) = context.answer_ping(*ping).await {
                    context.report(&e);
                }
                return;
            }
            Payload::KeepAliveReply(reply) => {
                let rtt = context.record_pong(*reply);
                trace!(peer = ?context.endpoint(), rtt_ms = rtt.as_millis() as u64, "Keep-alive reply");
                return;
            }
            _ => {}
        }

        let type_tag = payload.type_tag().to_string();
        match self.dispatcher.route(context.clone(), payload) {
            Ok(Routed::Handler(future)) | Ok(Routed::Fallback(future)) => {
                let run = run_handler(self.env.clone(), context.clone(), type_tag, future);
                if self.asynchronous {
                    tokio::spawn(run);
                } else {
                    run.await;
                }
            }
            Ok(Routed::Dropped) => {}
            Err(e) => context.report(&e),
        }
    }
}

/// Await a handler or fallback, reporting errors and panics instead of
/// propagating them.
async fn run_handler(
    env: Arc<Environment>,
    context: Arc<Context>,
    type_tag: String,
    future: BoxFuture<'static, Result<()>>,
) {
    let outcome = AssertUnwindSafe(future).catch_unwind().await;
    let err = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(_) => ProtocolError::handler(&type_tag, "handler panicked"),
    };
    env.metrics.handler_error();
    context.report(&err);
}
