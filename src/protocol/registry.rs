//! # Connection Context Registry
//!
//! Maps remote endpoints to their [`Context`] and expires the ones that have
//! gone quiet.
//!
//! ## Custodian
//! A background task sweeps the registry on a fixed interval:
//! - contexts already shut down are removed
//! - contexts idle longer than the keep-alive expiration are shut down and removed
//!
//! Only one sweep runs at a time; a tick that finds a sweep in progress is
//! skipped rather than queued.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::KeepAliveConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::context::{Context, Environment, SocketSlot};
use crate::utils::metrics::Timer;

/// Concurrent endpoint → context map owned by one messenger.
pub struct ContextRegistry {
    contexts: RwLock<HashMap<SocketAddr, Arc<Context>>>,
    socket: RwLock<SocketSlot>,
    env: Arc<Environment>,
    keep_alive: KeepAliveConfig,
    listening: AtomicBool,
    sweeping: AtomicBool,
}

impl ContextRegistry {
    pub(crate) fn new(env: Arc<Environment>, keep_alive: KeepAliveConfig) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            socket: RwLock::new(SocketSlot::default()),
            env,
            keep_alive,
            listening: AtomicBool::new(false),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Socket used by every context of this registry, old and new.
    pub(crate) fn attach_socket(&self, socket: Arc<UdpSocket>) {
        if let Ok(slot) = self.socket.read() {
            if let Ok(mut current) = slot.write() {
                *current = Some(socket);
            }
        }
    }

    /// Take the socket away from every context handed out so far. Contexts
    /// created afterwards get a fresh slot, so a later `attach_socket` never
    /// revives the old ones.
    pub(crate) fn detach_socket(&self) {
        if let Ok(mut slot) = self.socket.write() {
            if let Ok(mut current) = slot.write() {
                *current = None;
            }
            *slot = SocketSlot::default();
        }
    }

    /// In listening mode every new context starts its keep-alive.
    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Context for `endpoint`, created on first use.
    pub fn get_or_create(&self, endpoint: SocketAddr) -> Result<Arc<Context>> {
        if let Some(context) = self.get(endpoint) {
            return Ok(context);
        }

        let socket = self
            .socket
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))?
            .clone();

        let (context, created) = {
            let mut contexts = self
                .contexts
                .write()
                .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))?;
            let mut created = false;
            let context = contexts
                .entry(endpoint)
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Context::new(endpoint, socket, self.env.clone()))
                })
                .clone();
            (context, created)
        };

        if created {
            debug!(peer = %endpoint, "Context created");
            self.env.metrics.context_created();
            if self.is_listening() {
                context.start_default_keep_alive()?;
            }
        }

        Ok(context)
    }

    /// Context for `endpoint`, if one exists.
    pub fn get(&self, endpoint: SocketAddr) -> Option<Arc<Context>> {
        self.contexts
            .read()
            .ok()
            .and_then(|contexts| contexts.get(&endpoint).cloned())
    }

    pub fn len(&self) -> usize {
        self.contexts.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove shut-down and idle contexts. Returns how many were removed, or
    /// zero if another sweep was already running.
    pub fn sweep(&self) -> usize {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Sweep already in progress, skipping");
            return 0;
        }

        let _timer = Timer::start("context_sweep");
        let evicted = self.evict_expired(self.keep_alive.expiration);
        self.sweeping.store(false, Ordering::Release);

        if evicted > 0 {
            self.env.metrics.contexts_evicted(evicted as u64);
            info!(evicted, remaining = self.len(), "Evicted idle contexts");
        }
        evicted
    }

    fn evict_expired(&self, expiration: Duration) -> usize {
        let Ok(mut contexts) = self.contexts.write() else {
            self.env.events.report(
                None,
                &ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()),
            );
            return 0;
        };

        let before = contexts.len();
        contexts.retain(|endpoint, context| {
            if context.is_shut_down() {
                return false;
            }
            if context.is_idle(expiration) {
                debug!(peer = %endpoint, "Context expired");
                context.shutdown();
                return false;
            }
            true
        });
        before - contexts.len()
    }

    /// Run [`sweep`](Self::sweep) every custodian interval until `token` is
    /// cancelled.
    pub fn start_custodian(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let interval = self.keep_alive.custodian_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.sweep();
                    }
                }
            }
            trace!("Custodian finished");
        })
    }

    /// Shut down and remove every context.
    pub fn shutdown_all(&self) {
        if let Ok(mut contexts) = self.contexts.write() {
            for context in contexts.values() {
                context.shutdown();
            }
            contexts.clear();
        }
    }
}
