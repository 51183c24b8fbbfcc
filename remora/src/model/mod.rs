//! Mirrored collections.
//!
//! A [`CollectionServer`] exposes a local [`CollectionSource`] under a name.
//! The peer attaches a [`RemoteCollection`] with the same name and reads it as
//! if it were local: counts and cells are fetched lazily and in batches,
//! structural changes are replayed on the cache in the order they happened.
//!
//! The server stays idle until a mirror is attached.

mod change;
mod collection;
mod data;
mod memory;
mod path;
pub(crate) mod protocol;
mod remote;
mod server;

pub use change::{ChangesSince, CollectionChange, CollectionEvent};
pub use collection::{Collection, CollectionSource};
pub use data::{ItemFlags, Orientation, Role, Value};
pub use memory::MemoryCollection;
pub use path::{CellRange, PathIndex};
pub use remote::{CellState, NodeKey, NodeState, RemoteCollection};
pub use server::CollectionServer;

pub(crate) use change::Subscribers;
