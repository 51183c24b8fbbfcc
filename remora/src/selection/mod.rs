//! Selection shared between the two peers for one mirrored collection.
//!
//! Both sides attach a [`SelectionMirror`] under the same name, each bound to
//! its own view of the collection: the [`CollectionServer`](crate::CollectionServer)
//! on the probe, the [`RemoteCollection`](crate::RemoteCollection) on the client.

mod mirror;
mod state;

pub use mirror::{PathState, SelectionBinding, SelectionEvent, SelectionMirror};
pub use state::{SelectionFlags, SelectionRange};
