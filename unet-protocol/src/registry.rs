//! Packet registry: identifier to factory, and concrete type back to identifier.
//!
//! The registry is assembled once before a processor is built and is only
//! read afterwards, so it can be shared across tasks behind an `Arc` without
//! locking.

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketId};
use crate::packets::{ErrorPacket, HandshakePacket, ERROR_ID, HANDSHAKE_ID};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Produces an empty packet ready to be populated from a payload.
pub type PacketFactory = Arc<dyn Fn() -> Box<dyn Packet> + Send + Sync>;

/// Maps packet identifiers to factories.
pub struct PacketRegistry {
    factories: HashMap<PacketId, PacketFactory>,
    ids_by_type: HashMap<TypeId, PacketId>,
}

impl PacketRegistry {
    /// Creates a registry holding the built-in handshake and error packets.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert::<HandshakePacket>(HANDSHAKE_ID);
        registry.insert::<ErrorPacket>(ERROR_ID);
        registry
    }

    /// Creates a registry without the built-in packets.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            ids_by_type: HashMap::new(),
        }
    }

    fn insert<T: Packet + Default>(&mut self, id: PacketId) {
        self.factories
            .insert(id, Arc::new(|| Box::new(T::default()) as Box<dyn Packet>));
        self.ids_by_type.insert(TypeId::of::<T>(), id);
    }

    /// Registers a factory under `id`.
    ///
    /// The factory is invoked once to learn the concrete type it produces, which
    /// backs [`identifier_of`](Self::identifier_of) on the send path.
    pub fn register<F>(&mut self, id: PacketId, factory: F) -> Result<(), ProtocolError>
    where
        F: Fn() -> Box<dyn Packet> + Send + Sync + 'static,
    {
        if self.factories.contains_key(&id) {
            return Err(ProtocolError::DuplicateIdentifier(id));
        }

        let probe = factory();
        let type_id = probe.as_ref().as_any().type_id();
        if let Some(&existing) = self.ids_by_type.get(&type_id) {
            return Err(ProtocolError::DuplicateType {
                type_name: probe.type_name(),
                existing,
            });
        }

        tracing::debug!(id, packet = probe.type_name(), "registered packet type");
        self.factories.insert(id, Arc::new(factory));
        self.ids_by_type.insert(type_id, id);
        Ok(())
    }

    /// Registers `T` under `id`, constructing instances with `T::default()`.
    pub fn register_type<T: Packet + Default>(&mut self, id: PacketId) -> Result<(), ProtocolError> {
        self.register(id, || Box::new(T::default()) as Box<dyn Packet>)
    }

    /// Builder-style variant of [`register_type`](Self::register_type).
    pub fn with_packet<T: Packet + Default>(mut self, id: PacketId) -> Result<Self, ProtocolError> {
        self.register_type::<T>(id)?;
        Ok(self)
    }

    /// Looks up the factory for `id`.
    pub fn resolve(&self, id: PacketId) -> Result<&PacketFactory, ProtocolError> {
        self.factories
            .get(&id)
            .ok_or(ProtocolError::UnknownIdentifier(id))
    }

    /// Creates an empty packet for `id`.
    pub fn instantiate(&self, id: PacketId) -> Result<Box<dyn Packet>, ProtocolError> {
        let factory = self.resolve(id)?;
        Ok(factory())
    }

    /// Returns the identifier registered for the concrete type of `packet`.
    pub fn identifier_of(&self, packet: &dyn Packet) -> Result<PacketId, ProtocolError> {
        let type_id = packet.as_any().type_id();
        self.ids_by_type
            .get(&type_id)
            .copied()
            .ok_or_else(|| ProtocolError::UnregisteredType(packet.type_name()))
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.factories.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered identifiers in ascending order.
    pub fn ids(&self) -> Vec<PacketId> {
        let mut ids: Vec<_> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
