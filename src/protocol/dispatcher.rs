use crate::core::payload::{is_reserved_tag, Datagram, Payload, TypeRegistry, TypedDatagram};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::context::Context;
use futures::future::{BoxFuture, FutureExt};
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(Arc<Context>, TypedDatagram) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Callback for payloads with no bound handler, including raw bytes.
pub type FallbackFn = Arc<dyn Fn(Arc<Context>, Payload) + Send + Sync>;

/// A caller-constructed handler for datagrams of type `T`.
///
/// The dispatcher keeps the `Arc` it is given, so state held by the handler
/// persists across calls.
pub trait DatagramHandler<T: Datagram>: Send + Sync + 'static {
    fn handle(&self, context: Arc<Context>, datagram: T) -> BoxFuture<'_, Result<()>>;
}

/// Routes decoded datagrams to handlers by type tag.
/// Static tags are borrowed so lookups never allocate.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Arc<HandlerFn>>>>,
    fallback: RwLock<Option<FallbackFn>>,
    types: TypeRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(TypeRegistry::new())
    }
}

/// Where a payload handed to [`Dispatcher::route`] is going. Nothing runs
/// until the carried future is polled.
pub enum Routed {
    /// A handler is bound; the future runs it.
    Handler(BoxFuture<'static, Result<()>>),
    /// No handler is bound; the future invokes the fallback callback.
    Fallback(BoxFuture<'static, Result<()>>),
    /// Nothing was bound and no fallback is installed.
    Dropped,
}

impl Dispatcher {
    /// Dispatcher that registers handled types in `types`.
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            fallback: RwLock::new(None),
            types,
        }
    }

    /// Bind a handler taking only the datagram.
    pub fn register<T, F, Fut>(&self, handler: F) -> Result<()>
    where
        T: Datagram,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.bind::<T>(Arc::new(
            move |_context: Arc<Context>, datagram: TypedDatagram| match datagram.downcast::<T>() {
                Ok(value) => handler(value).boxed(),
                Err(other) => mismatch::<T>(other),
            },
        ))
    }

    /// Bind a handler taking the sender's context and the datagram.
    pub fn register_with_context<T, F, Fut>(&self, handler: F) -> Result<()>
    where
        T: Datagram,
        F: Fn(Arc<Context>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.bind::<T>(Arc::new(
            move |context: Arc<Context>, datagram: TypedDatagram| match datagram.downcast::<T>() {
                Ok(value) => handler(context, value).boxed(),
                Err(other) => mismatch::<T>(other),
            },
        ))
    }

    /// Bind a handler instance.
    pub fn add_handler<T, H>(&self, handler: Arc<H>) -> Result<()>
    where
        T: Datagram,
        H: DatagramHandler<T>,
    {
        self.bind::<T>(Arc::new(
            move |context: Arc<Context>, datagram: TypedDatagram| match datagram.downcast::<T>() {
                Ok(value) => {
                    let handler = handler.clone();
                    async move { handler.handle(context, value).await }.boxed()
                }
                Err(other) => mismatch::<T>(other),
            },
        ))
    }

    fn bind<T: Datagram>(&self, handler: Arc<HandlerFn>) -> Result<()> {
        if is_reserved_tag(T::TYPE_TAG) {
            return Err(ProtocolError::ReservedType(T::TYPE_TAG.to_string()));
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        if handlers.contains_key(T::TYPE_TAG) {
            return Err(ProtocolError::DuplicateHandler(T::TYPE_TAG.to_string()));
        }

        self.types.register::<T>()?;
        handlers.insert(Cow::Borrowed(T::TYPE_TAG), handler);
        Ok(())
    }

    /// Install the callback for unbound payloads.
    pub fn set_fallback(&self, fallback: Option<FallbackFn>) {
        if let Ok(mut slot) = self.fallback.write() {
            *slot = fallback;
        }
    }

    pub fn is_bound(&self, type_tag: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(type_tag))
            .unwrap_or(false)
    }

    /// Route one payload: a bound datagram yields its handler future,
    /// anything else a future that calls the fallback exactly once.
    pub fn route(&self, context: Arc<Context>, payload: Payload) -> Result<Routed> {
        let datagram = match payload {
            Payload::Datagram(datagram) => datagram,
            other => return Ok(self.fall_back(context, other)),
        };

        let handler = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?
            .get(datagram.type_tag())
            .cloned();

        match handler {
            Some(handler) => Ok(Routed::Handler(
                async move { handler(context, datagram).await }.boxed(),
            )),
            None => Ok(self.fall_back(context, Payload::Datagram(datagram))),
        }
    }

    /// Route and run to completion.
    pub async fn dispatch(&self, context: Arc<Context>, payload: Payload) -> Result<()> {
        match self.route(context, payload)? {
            Routed::Handler(future) | Routed::Fallback(future) => future.await,
            Routed::Dropped => Ok(()),
        }
    }

    fn fall_back(&self, context: Arc<Context>, payload: Payload) -> Routed {
        let fallback = self.fallback.read().ok().and_then(|slot| slot.clone());
        match fallback {
            Some(fallback) => Routed::Fallback(
                async move {
                    fallback(context, payload);
                    Ok(())
                }
                .boxed(),
            ),
            None => {
                tracing::debug!(type_tag = payload.type_tag(), "No handler bound, payload dropped");
                Routed::Dropped
            }
        }
    }
}

#[inline]
fn mismatch<T: Datagram>(other: TypedDatagram) -> BoxFuture<'static, Result<()>> {
    let found = other.type_tag();
    Box::pin(async move {
        Err(ProtocolError::handler(
            T::TYPE_TAG,
            format!("received a datagram of type [{found}]"),
        ))
    })
}
