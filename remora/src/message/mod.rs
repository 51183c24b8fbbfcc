//! Framed messages exchanged between two endpoints.
//!
//! ```text
//! frame   = u32 payload_size | payload
//! payload = u8 address | u8 message_type | type specific fields
//! ```

mod address;
mod codec;
mod message_type;
pub mod wire;

use bytes::{Bytes, BytesMut};

pub use address::ObjectAddress;
pub use codec::MessageCodec;
pub use message_type::MessageType;
pub use wire::{Decode, Encode};

use crate::Result;

/// Version exchanged in the handshake. Peers with different versions refuse
/// to talk to each other.
pub const PROTOCOL_VERSION: u32 = 1;

/// One framed envelope: receiver-local address, type tag and encoded fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub address: ObjectAddress,
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Message {
    pub fn new(address: ObjectAddress, message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            message_type,
            payload: payload.into(),
        }
    }

    /// Build a message whose payload is the encoding of `fields`.
    pub fn with_fields<T: Encode + ?Sized>(
        address: ObjectAddress,
        message_type: MessageType,
        fields: &T,
    ) -> Self {
        Self::new(address, message_type, wire::to_payload(fields))
    }

    /// Control message on the reserved address.
    pub fn control<T: Encode + ?Sized>(message_type: MessageType, fields: &T) -> Self {
        Self::with_fields(ObjectAddress::INVALID, message_type, fields)
    }

    /// Decode the payload as `T`. Trailing bytes are ignored so that newer
    /// peers may append fields.
    pub fn decode<T: Decode>(&self) -> Result<T> {
        let mut payload = self.payload.clone();
        T::decode(&mut payload)
    }

    /// Size of the payload section on the wire, header included.
    pub fn wire_size(&self) -> usize {
        self.payload.len() + 2
    }

    pub(crate) fn encode_body(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_size());
        self.address.get().encode(buf);
        u8::from(self.message_type).encode(buf);
        buf.extend_from_slice(&self.payload);
    }
}
