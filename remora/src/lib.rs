//! Remora - remote introspection transport
//!
//! Lets a thin observer inspect and drive live state inside another process
//! over a single duplex byte stream, without ever pausing that process:
//!
//! - [`Endpoint`]: framed messages routed to named objects by small addresses,
//! - [`ObjectBroker`]: name → instance registry with lazy factories,
//! - [`CollectionServer`] / [`RemoteCollection`]: lazily paged mirroring of
//!   hierarchical row × column collections,
//! - [`SelectionMirror`]: selection state kept in sync on both sides,
//! - [`ViewFrameServer`] / [`ViewClient`]: frame streaming with backpressure.
//!
//! Everything is wired together through an explicit [`Context`].

extern crate self as remora;

mod broker;
mod config;
mod context;
mod error;
mod label;

pub mod endpoint;
pub mod message;
pub mod model;
pub mod selection;
pub mod view;

pub use broker::{EntryKind, ObjectBroker, SharedEntry};
pub use config::{Config, DEFAULT_PORT};
pub use context::Context;
pub use endpoint::{ConnectionState, Endpoint, MessageHandler, PendingAddress};
pub use error::Error;
pub use label::Label;
pub use message::{Message, MessageCodec, MessageType, ObjectAddress, PROTOCOL_VERSION};
pub use model::{CollectionServer, RemoteCollection};
pub use selection::SelectionMirror;
pub use view::{ViewClient, ViewFrameServer};

pub use remora_macros::Label;

pub type Result<T = ()> = std::result::Result<T, Error>;
