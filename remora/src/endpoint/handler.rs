use crate::{Message, Result};

/// Receives the messages addressed to one registered object.
///
/// Handlers run on the endpoint's dispatch task, one message at a time and in
/// arrival order. They must not block: anything slow belongs in a spawned task.
///
/// Only [`handle_message`](MessageHandler::handle_message) is required. The
/// remaining hooks report lifecycle changes of the connection as seen from this
/// object:
///
/// - `monitored_changed`: whether the peer currently watches this object.
///   Producers use it to stay idle while nobody is looking.
/// - `peer_changed`: whether the peer has an object registered under the same
///   name. Mirrors use it to evict caches when their source goes away.
/// - `unregistered`: called once when the object is removed from the endpoint,
///   either explicitly or on disconnect.
pub trait MessageHandler: Send + 'static {
    /// Handle a message addressed to this object.
    ///
    /// An error is logged and the message is dropped; the connection stays up.
    fn handle_message(&mut self, message: &Message) -> Result<()>;

    fn monitored_changed(&mut self, monitored: bool) {
        let _m = monitored;
    }

    fn peer_changed(&mut self, present: bool) {
        let _p = present;
    }

    fn unregistered(&mut self) {}
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message) -> Result<()> + Send + 'static,
{
    fn handle_message(&mut self, message: &Message) -> Result<()> {
        self(message)
    }
}
