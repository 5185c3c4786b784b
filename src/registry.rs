//! Message type registry: wire type id ↔ name ↔ decoder.
//!
//! The registry is explicit, process-scoped state. Build one at startup,
//! hand it to a [`ConnectionManager`](crate::ConnectionManager), and
//! every connection it creates shares it through an `Arc`.
//!
//! When the registry is non-empty, a connection drops inbound messages
//! whose type id is not registered (with a warning). An empty registry
//! accepts everything and leaves bodies uninterpreted.
//!
//! # Example
//!
//! ```
//! use msgwire::MessageRegistry;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Progress { percent: u8 }
//!
//! let mut registry = MessageRegistry::new();
//! registry.register::<Progress>(2, "Progress").unwrap();
//!
//! let message = registry.encode(&Progress { percent: 40 }).unwrap();
//! assert_eq!(message.type_id(), 2);
//! assert_eq!(registry.decode_as::<Progress>(&message).unwrap().percent, 40);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::error::{IpcError, Result};
use crate::protocol::{Message, KEEP_ALIVE_TYPE_ID};

/// A decoded body of some registered type.
pub type DecodedValue = Box<dyn Any + Send>;

/// Turns a raw body into a typed value.
///
/// Implemented for closures, so custom schemas can be plugged in:
///
/// ```
/// use msgwire::{DecodedValue, MessageRegistry};
///
/// let mut registry = MessageRegistry::new();
/// registry
///     .register_decoder(5, "Utf8Text", |body: &[u8]| {
///         Ok(Box::new(String::from_utf8_lossy(body).into_owned()) as DecodedValue)
///     })
///     .unwrap();
/// ```
pub trait Decoder: Send + Sync + 'static {
    /// Decode a body.
    fn decode(&self, body: &[u8]) -> Result<DecodedValue>;
}

impl<F> Decoder for F
where
    F: Fn(&[u8]) -> Result<DecodedValue> + Send + Sync + 'static,
{
    fn decode(&self, body: &[u8]) -> Result<DecodedValue> {
        (self)(body)
    }
}

/// MsgPack decoder for a serde type.
pub struct TypedDecoder<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> TypedDecoder<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for TypedDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Decoder for TypedDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn decode(&self, body: &[u8]) -> Result<DecodedValue> {
        let value: T = MsgPackCodec::decode(body)?;
        Ok(Box::new(value))
    }
}

/// Entry for a registered type.
struct TypeEntry {
    name: String,
    decoder: Box<dyn Decoder>,
}

/// Registry mapping wire type ids to names and decoders.
#[derive(Default)]
pub struct MessageRegistry {
    /// Entries by wire type id.
    types: HashMap<u32, TypeEntry>,
    /// Name to type id mapping.
    name_to_id: HashMap<String, u32>,
    /// Rust type to type id mapping (for typed send/receive).
    rust_to_id: HashMap<TypeId, u32>,
}

impl MessageRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serde type under `type_id`, encoded as MsgPack.
    ///
    /// Re-registering an id replaces the previous entry. Registering `T`
    /// under a new id moves it: the old id is forgotten.
    pub fn register<T>(&mut self, type_id: u32, name: &str) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        if type_id == KEEP_ALIVE_TYPE_ID {
            return Err(IpcError::ReservedType(type_id));
        }
        if let Some(&old_id) = self.rust_to_id.get(&TypeId::of::<T>()) {
            if old_id != type_id {
                self.remove_id(old_id);
            }
        }
        self.register_decoder(type_id, name, TypedDecoder::<T>::new())?;
        self.rust_to_id.insert(TypeId::of::<T>(), type_id);
        Ok(())
    }

    /// Register a custom decoder under `type_id`.
    ///
    /// A name already registered under another id moves to `type_id`.
    pub fn register_decoder<D: Decoder>(&mut self, type_id: u32, name: &str, decoder: D) -> Result<()> {
        if type_id == KEEP_ALIVE_TYPE_ID {
            return Err(IpcError::ReservedType(type_id));
        }
        if let Some(&old_id) = self.name_to_id.get(name) {
            if old_id != type_id {
                self.remove_id(old_id);
            }
        }

        if let Some(previous) = self.types.insert(
            type_id,
            TypeEntry {
                name: name.to_string(),
                decoder: Box::new(decoder),
            },
        ) {
            tracing::debug!(
                "Type id {} re-registered: {} -> {}",
                type_id,
                previous.name,
                name
            );
            self.name_to_id.remove(&previous.name);
            self.rust_to_id.retain(|_, id| *id != type_id);
        }
        self.name_to_id.insert(name.to_string(), type_id);
        Ok(())
    }

    /// Forget everything registered under `type_id`.
    fn remove_id(&mut self, type_id: u32) {
        if let Some(entry) = self.types.remove(&type_id) {
            tracing::debug!("Type {} moved off id {}", entry.name, type_id);
            self.name_to_id.remove(&entry.name);
        }
        self.rust_to_id.retain(|_, id| *id != type_id);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[inline]
    pub fn contains(&self, type_id: u32) -> bool {
        self.types.contains_key(&type_id)
    }

    /// Whether a connection should deliver messages of this type.
    #[inline]
    pub fn accepts(&self, type_id: u32) -> bool {
        self.is_empty() || self.contains(type_id)
    }

    /// Get the registered name of a type id.
    pub fn name_of(&self, type_id: u32) -> Option<&str> {
        self.types.get(&type_id).map(|e| e.name.as_str())
    }

    /// Get the type id registered under a name.
    pub fn type_id_of(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    /// Get the type id registered for a Rust type.
    pub fn type_id_for<T: 'static>(&self) -> Result<u32> {
        self.rust_to_id
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(IpcError::UnregisteredType(std::any::type_name::<T>()))
    }

    /// Decode a message with whatever decoder its type id maps to.
    pub fn decode(&self, message: &Message) -> Result<DecodedValue> {
        let entry = self
            .types
            .get(&message.type_id())
            .ok_or(IpcError::UnknownMessageType(message.type_id()))?;
        entry.decoder.decode(message.body())
    }

    /// Decode a message as a specific registered Rust type.
    pub fn decode_as<T>(&self, message: &Message) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        let expected = self.type_id_for::<T>()?;
        if message.type_id() != expected {
            return Err(IpcError::TypeMismatch {
                expected,
                actual: message.type_id(),
            });
        }
        MsgPackCodec::decode(message.body())
    }

    /// Encode a registered Rust value into a message.
    pub fn encode<T: Serialize + 'static>(&self, value: &T) -> Result<Message> {
        let type_id = self.type_id_for::<T>()?;
        MsgPackCodec::encode_message(type_id, value)
    }
}
