//! # meshbank-transport
//!
//! Interprocess messaging for meshbank participants.
//!
//! - [`ChannelFabric`]: one pipe per direction per participant pair, built
//!   before participants are spawned
//! - [`wire`]: the fixed 16-byte header and per-kind payload encodings
//! - [`Transport`]: async send, multicast and receive over one participant's
//!   [`ChannelTable`]
//!
//! Delivery is reliable and FIFO per ordered pair. There is no ordering
//! across different senders.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod error;
mod fabric;
mod message;
mod transport;
pub mod wire;

pub use error::{FabricError, TransportError, TransportResult};
pub use fabric::{Channel, ChannelDescriptor, ChannelFabric, ChannelTable};
pub use message::{Message, MessageBody, MessageKind};
pub use transport::Transport;
pub use wire::{
    FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, MESSAGE_MAGIC, WireError, decode_body,
    deserialize_message, encode_body, serialize_message,
};
