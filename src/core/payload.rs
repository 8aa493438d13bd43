//! # Payload Model
//!
//! Everything that can travel inside a frame body.
//!
//! Application messages implement [`Datagram`], which pins a stable type tag
//! to the Rust type. The tag is written into the frame body and is the only
//! thing the receiving side uses to pick a concrete type, so it must be the
//! same on both ends and must never change once deployed.
//!
//! ```rust
//! use datagram_messenger::core::payload::Datagram;
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
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BYTES_TYPE_TAG;
use crate::core::serialization::SerializationProvider;
use crate::error::{constants, ProtocolError, Result};

/// Type tag of the keep-alive ping
pub const KEEPALIVE_TYPE_TAG: &str = "dm.keepalive";

/// Type tag of the keep-alive reply
pub const KEEPALIVE_REPLY_TYPE_TAG: &str = "dm.keepalive.reply";

/// A message type that can be framed and routed by its type tag.
pub trait Datagram: Serialize + DeserializeOwned + Send + 'static {
    /// Stable routing key written into every frame carrying this type.
    const TYPE_TAG: &'static str;
}

/// Keep-alive ping carrying the UTC send time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub timestamp_ms: u64,
}

impl Datagram for KeepAlive {
    const TYPE_TAG: &'static str = KEEPALIVE_TYPE_TAG;
}

/// Keep-alive reply echoing the timestamp of the ping it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveReply {
    pub timestamp_ms: u64,
}

impl Datagram for KeepAliveReply {
    const TYPE_TAG: &'static str = KEEPALIVE_REPLY_TYPE_TAG;
}

/// Whether a tag is owned by the messenger itself.
pub fn is_reserved_tag(tag: &str) -> bool {
    tag == BYTES_TYPE_TAG || tag == KEEPALIVE_TYPE_TAG || tag == KEEPALIVE_REPLY_TYPE_TAG
}

/// A decoded application datagram with its concrete type erased.
pub struct TypedDatagram {
    type_tag: &'static str,
    value: Box<dyn Any + Send>,
}

impl TypedDatagram {
    /// Wrap a concrete datagram.
    pub fn new<T: Datagram>(value: T) -> Self {
        Self {
            type_tag: T::TYPE_TAG,
            value: Box::new(value),
        }
    }

    /// Routing key of the contained value.
    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Whether the contained value is a `T`.
    pub fn is<T: Datagram>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrow the contained value as `T`.
    pub fn downcast_ref<T: Datagram>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the contained value as `T`, handing the datagram back on mismatch.
    pub fn downcast<T: Datagram>(self) -> std::result::Result<T, Self> {
        let type_tag = self.type_tag;
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self { type_tag, value }),
        }
    }
}

impl fmt::Debug for TypedDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedDatagram")
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// Logical content of one frame.
#[derive(Debug)]
pub enum Payload {
    /// Raw bytes sent without object serialization
    Bytes(Vec<u8>),
    /// Keep-alive ping
    KeepAlive(KeepAlive),
    /// Keep-alive reply
    KeepAliveReply(KeepAliveReply),
    /// Registered application datagram
    Datagram(TypedDatagram),
    /// Frame whose tag has no registered type on this side
    Unresolved { type_tag: String, text: String },
}

impl Payload {
    /// Type tag this payload travels under.
    pub fn type_tag(&self) -> &str {
        match self {
            Payload::Bytes(_) => BYTES_TYPE_TAG,
            Payload::KeepAlive(_) => KEEPALIVE_TYPE_TAG,
            Payload::KeepAliveReply(_) => KEEPALIVE_REPLY_TYPE_TAG,
            Payload::Datagram(datagram) => datagram.type_tag(),
            Payload::Unresolved { type_tag, .. } => type_tag,
        }
    }

    /// Borrow an application datagram as `T`, if that is what this is.
    pub fn downcast_ref<T: Datagram>(&self) -> Option<&T> {
        match self {
            Payload::Datagram(datagram) => datagram.downcast_ref::<T>(),
            _ => None,
        }
    }
}

type DecodeFn = fn(&dyn SerializationProvider, &str) -> Result<TypedDatagram>;

fn decode_typed<T: Datagram>(
    serialization: &dyn SerializationProvider,
    text: &str,
) -> Result<TypedDatagram> {
    let value = serialization.deserialize_from_text(text)?;
    let typed: T = serde_json::from_value(value)
        .map_err(|e| ProtocolError::DeserializeError(format!("{}: {e}", T::TYPE_TAG)))?;
    Ok(TypedDatagram::new(typed))
}

/// Maps type tags to the decoder of their concrete type.
///
/// Owned by a messenger (and shared with its codecs), never global.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: Arc<RwLock<HashMap<&'static str, DecodeFn>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `T` decodable. Registering the same type twice is harmless.
    pub fn register<T: Datagram>(&self) -> Result<()> {
        if is_reserved_tag(T::TYPE_TAG) {
            return Err(ProtocolError::ReservedType(T::TYPE_TAG.to_string()));
        }
        let mut decoders = self
            .decoders
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;
        decoders.insert(T::TYPE_TAG, decode_typed::<T>);
        Ok(())
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.decoders
            .read()
            .map(|decoders| decoders.contains_key(type_tag))
            .unwrap_or(false)
    }

    /// Resolve a non-reserved frame body into a payload.
    pub(crate) fn resolve(
        &self,
        serialization: &dyn SerializationProvider,
        type_tag: String,
        text: String,
    ) -> Result<Payload> {
        let decoder = self
            .decoders
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?
            .get(type_tag.as_str())
            .copied();

        match decoder {
            Some(decode) => Ok(Payload::Datagram(decode(serialization, &text)?)),
            None => Ok(Payload::Unresolved { type_tag, text }),
        }
    }
}
