use super::{ItemFlags, Orientation, PathIndex, Role, Value};

/// Read access to a hierarchical row × column collection.
///
/// Counts return `None` when `parent` does not exist (anymore). Probed data
/// changes concurrently, so absence is a regular answer rather than an error.
pub trait Collection {
    fn row_count(&self, parent: &PathIndex) -> Option<i32>;

    fn column_count(&self, parent: &PathIndex) -> Option<i32>;

    fn data(&self, path: &PathIndex, role: Role) -> Value;

    fn flags(&self, path: &PathIndex) -> ItemFlags;

    fn header_data(&self, orientation: Orientation, section: i32, role: Role) -> Value {
        let _unused = (orientation, section, role);
        Value::Null
    }
}

/// A collection that can be served to a peer.
pub trait CollectionSource: Collection + Send + 'static {
    /// Write a value on behalf of the peer. Returns whether it was accepted.
    fn set_data(&mut self, path: &PathIndex, role: Role, value: Value) -> bool {
        let _unused = (path, role, value);
        false
    }
}
