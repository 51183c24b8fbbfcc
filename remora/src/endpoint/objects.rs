use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::MessageHandler;
use crate::{Error, Message, MessageType, ObjectAddress, Result};

/// Outcome of routing one inbound message.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Delivered,
    /// Nothing is registered at the address. Expected while the peer still has
    /// messages in flight for an object that was just unregistered.
    Dropped,
    /// The handler rejected the message.
    Failed(Error),
}

pub(crate) struct LocalObject {
    pub name: Arc<str>,
    pub handler: Box<dyn MessageHandler>,
    pub monitored: bool,
}

/// Objects registered on this side, addressable by the peer.
#[derive(Default)]
pub(crate) struct LocalObjects {
    by_name: HashMap<Arc<str>, ObjectAddress>,
    by_address: BTreeMap<ObjectAddress, LocalObject>,
}

impl LocalObjects {
    /// Assign the lowest free address to `name`.
    pub fn register(
        &mut self,
        name: Arc<str>,
        handler: Box<dyn MessageHandler>,
    ) -> Result<ObjectAddress> {
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateRegistration(name));
        }
        let address = (1..=ObjectAddress::MAX.get())
            .map(ObjectAddress::new)
            .find(|a| !self.by_address.contains_key(a))
            .ok_or(Error::AddressSpaceExhausted)?;
        self.by_name.insert(name.clone(), address);
        self.by_address.insert(
            address,
            LocalObject {
                name,
                handler,
                monitored: false,
            },
        );
        Ok(address)
    }

    /// Free the address of `name` and hand back its entry.
    pub fn unregister(&mut self, name: &str) -> Option<(ObjectAddress, LocalObject)> {
        let address = self.by_name.remove(name)?;
        self.by_address
            .remove(&address)
            .map(|object| (address, object))
    }

    #[cfg(test)]
    pub fn address(&self, name: &str) -> Option<ObjectAddress> {
        self.by_name.get(name).copied()
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut LocalObject> {
        let address = self.by_name.get(name)?;
        self.by_address.get_mut(address)
    }

    pub fn get_mut(&mut self, address: ObjectAddress) -> Option<&mut LocalObject> {
        self.by_address.get_mut(&address)
    }

    pub fn dispatch(&mut self, message: &Message) -> Dispatch {
        match self.by_address.get_mut(&message.address) {
            Some(object) => match object.handler.handle_message(message) {
                Ok(()) => Dispatch::Delivered,
                Err(e) => Dispatch::Failed(e),
            },
            None => Dispatch::Dropped,
        }
    }

    /// Remove every object, returning them in address order.
    pub fn drain(&mut self) -> Vec<LocalObject> {
        self.by_name.clear();
        std::mem::take(&mut self.by_address).into_values().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_address.len()
    }
}

/// What this side knows about the peer's objects.
pub(crate) struct RemoteObjects {
    by_name: HashMap<Arc<str>, ObjectAddress>,
    pending: HashMap<Arc<str>, VecDeque<(MessageType, Bytes)>>,
    pending_count: usize,
    pending_limit: usize,
    monitored: HashSet<Arc<str>>,
    waiters: HashMap<Arc<str>, Vec<oneshot::Sender<Result<ObjectAddress>>>>,
}

impl RemoteObjects {
    pub fn new(pending_limit: usize) -> Self {
        Self {
            by_name: HashMap::new(),
            pending: HashMap::new(),
            pending_count: 0,
            pending_limit,
            monitored: HashSet::new(),
            waiters: HashMap::new(),
        }
    }

    pub fn address(&self, name: &str) -> Option<ObjectAddress> {
        self.by_name.get(name).copied()
    }

    /// Record an announcement. Returns the messages that were waiting for it.
    pub fn added(&mut self, name: Arc<str>, address: ObjectAddress) -> Vec<Message> {
        self.by_name.insert(name.clone(), address);
        for waiter in self.waiters.remove(&name).unwrap_or_default() {
            let _ = waiter.send(Ok(address));
        }
        let queued = self.pending.remove(&name).unwrap_or_default();
        self.pending_count -= queued.len();
        queued
            .into_iter()
            .map(|(message_type, payload)| Message::new(address, message_type, payload))
            .collect()
    }

    pub fn removed(&mut self, name: &str) -> Option<ObjectAddress> {
        if let Some(queued) = self.pending.remove(name) {
            self.pending_count -= queued.len();
        }
        self.by_name.remove(name)
    }

    /// Park a message until `name` is announced. Returns `false` when the
    /// backlog is full and the message was discarded.
    pub fn enqueue(&mut self, name: Arc<str>, message_type: MessageType, payload: Bytes) -> bool {
        if self.pending_count >= self.pending_limit {
            return false;
        }
        self.pending_count += 1;
        self.pending
            .entry(name)
            .or_default()
            .push_back((message_type, payload));
        true
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Remember whether this side watches the peer's `name`. Returns whether
    /// anything changed.
    pub fn set_monitored(&mut self, name: Arc<str>, monitored: bool) -> bool {
        if monitored {
            self.monitored.insert(name)
        } else {
            self.monitored.remove(&name)
        }
    }

    pub fn is_monitored(&self, name: &str) -> bool {
        self.monitored.contains(name)
    }

    pub fn wait(&mut self, name: Arc<str>, reply: oneshot::Sender<Result<ObjectAddress>>) {
        match self.by_name.get(&name) {
            Some(address) => {
                let _ = reply.send(Ok(*address));
            }
            None => self.waiters.entry(name).or_default().push(reply),
        }
    }

    /// Drop all knowledge about the peer and fail every waiter.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.pending.clear();
        self.pending_count = 0;
        for (_, waiters) in self.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(Error::Disconnected));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Log = Arc<Mutex<Vec<(u8, u32)>>>;

    fn recorder(log: &Log, id: u8) -> Box<dyn MessageHandler> {
        let log = log.clone();
        Box::new(move |message: &Message| -> Result<()> {
            let seq: u32 = message.decode()?;
            log.lock().unwrap().push((id, seq));
            Ok(())
        })
    }

    fn message(address: ObjectAddress, seq: u32) -> Message {
        Message::with_fields(address, MessageType::SelectionState, &seq)
    }

    #[test]
    fn test_addresses_start_at_one_and_are_reused() {
        let log = Log::default();
        let mut objects = LocalObjects::default();
        let a = objects.register("a".into(), recorder(&log, 1)).unwrap();
        let b = objects.register("b".into(), recorder(&log, 2)).unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);

        objects.unregister("a");
        let c = objects.register("c".into(), recorder(&log, 3)).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let log = Log::default();
        let mut objects = LocalObjects::default();
        objects.register("a".into(), recorder(&log, 1)).unwrap();
        let err = objects.register("a".into(), recorder(&log, 1)).unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration(name) if &*name == "a"));
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn test_address_space_exhaustion() {
        let log = Log::default();
        let mut objects = LocalObjects::default();
        for i in 0..255 {
            objects
                .register(format!("o{i}").into(), recorder(&log, 0))
                .unwrap();
        }
        assert!(matches!(
            objects.register("one-too-many".into(), recorder(&log, 0)),
            Err(Error::AddressSpaceExhausted)
        ));
    }

    #[test]
    fn test_in_flight_message_for_unregistered_address_is_dropped() {
        let log = Log::default();
        let mut objects = LocalObjects::default();
        for i in 1..=8u8 {
            objects
                .register(format!("o{i}").into(), recorder(&log, i))
                .unwrap();
        }
        let seven = objects.address("o7").unwrap();
        let eight = objects.address("o8").unwrap();
        assert_eq!(seven.get(), 7);

        assert!(matches!(objects.dispatch(&message(seven, 1)), Dispatch::Delivered));
        assert!(matches!(objects.dispatch(&message(seven, 2)), Dispatch::Delivered));
        objects.unregister("o7");
        assert!(matches!(objects.dispatch(&message(seven, 3)), Dispatch::Dropped));
        assert!(matches!(objects.dispatch(&message(eight, 4)), Dispatch::Delivered));

        assert_eq!(*log.lock().unwrap(), vec![(7, 1), (7, 2), (8, 4)]);
    }

    #[test]
    fn test_handler_failure_is_reported() {
        let log = Log::default();
        let mut objects = LocalObjects::default();
        let a = objects.register("a".into(), recorder(&log, 1)).unwrap();
        let empty = Message::new(a, MessageType::SelectionState, Bytes::new());
        assert!(matches!(objects.dispatch(&empty), Dispatch::Failed(Error::Decode(_))));
    }

    #[test]
    fn test_pending_messages_flush_on_announcement() {
        let mut remote = RemoteObjects::new(2);
        assert!(remote.enqueue("tree".into(), MessageType::ModelReset, Bytes::new()));
        assert!(remote.enqueue("tree".into(), MessageType::ModelReset, Bytes::new()));
        assert!(!remote.enqueue("tree".into(), MessageType::ModelReset, Bytes::new()));

        let flushed = remote.added("tree".into(), ObjectAddress::new(5));
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|m| m.address.get() == 5));
        assert_eq!(remote.pending_count(), 0);
    }

    #[test]
    fn test_waiters_fail_on_clear() {
        let mut remote = RemoteObjects::new(8);
        let (tx, mut rx) = oneshot::channel();
        remote.wait("late".into(), tx);
        remote.clear();
        assert!(matches!(rx.try_recv(), Ok(Err(Error::Disconnected))));
    }
}
