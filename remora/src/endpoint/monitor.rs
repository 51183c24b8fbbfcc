use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::Mutex;

use super::command::Observation;
use crate::{Message, MessageType};

/// Observer of an endpoint's traffic.
///
/// Callbacks run on the dispatch task and must be cheap. A monitor that
/// panics is removed.
pub trait EndpointMonitor: Send {
    /// A message was handed to the writer.
    fn on_message_sent(&self, message: &Message) {
        let _m = message;
    }

    /// A message reached a registered object.
    fn on_message_received(&self, message: &Message) {
        let _m = message;
    }

    /// A message arrived for an address with nothing registered.
    fn on_message_dropped(&self, message: &Message) {
        let _m = message;
    }

    fn on_disconnect(&self) {}
}

#[derive(Default)]
pub(crate) struct Monitors {
    monitors: Vec<Box<dyn EndpointMonitor>>,
    panicked: Vec<usize>,
}

impl Monitors {
    pub fn add(&mut self, monitor: Box<dyn EndpointMonitor>) {
        self.monitors.push(monitor);
    }

    pub fn notify(&mut self, observation: &Observation<'_>) {
        for (idx, monitor) in self.monitors.iter().enumerate() {
            let result = catch_unwind(AssertUnwindSafe(|| match observation {
                Observation::Sent(m) => monitor.on_message_sent(m),
                Observation::Received(m) => monitor.on_message_received(m),
                Observation::Dropped(m) => monitor.on_message_dropped(m),
                Observation::Disconnected => monitor.on_disconnect(),
            }));
            if result.is_err() {
                tracing::error!(monitor = idx, "Endpoint monitor panicked, removing");
                self.panicked.push(idx);
            }
        }

        for idx in self.panicked.drain(..).rev() {
            self.monitors.remove(idx);
        }
    }
}

/// Message and byte counters for one message type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrafficCounters {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub messages_dropped: u64,
}

/// Monitor counting traffic per message type.
///
/// Cheap to clone; clones share the same counters, so keep one and hand the
/// other to [`Endpoint::add_monitor`](crate::Endpoint::add_monitor).
#[derive(Debug, Clone, Default)]
pub struct MessageStatistics {
    counters: Arc<Mutex<BTreeMap<MessageType, TrafficCounters>>>,
}

impl MessageStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of one message type.
    pub fn get(&self, message_type: MessageType) -> TrafficCounters {
        self.counters
            .lock()
            .get(&message_type)
            .copied()
            .unwrap_or_default()
    }

    /// Counters of every type seen so far, ordered by wire value.
    pub fn snapshot(&self) -> Vec<(MessageType, TrafficCounters)> {
        self.counters
            .lock()
            .iter()
            .map(|(t, c)| (*t, *c))
            .collect()
    }

    fn update(&self, message: &Message, f: impl FnOnce(&mut TrafficCounters, u64)) {
        let mut counters = self.counters.lock();
        f(
            counters.entry(message.message_type).or_default(),
            message.wire_size() as u64,
        );
    }
}

impl EndpointMonitor for MessageStatistics {
    fn on_message_sent(&self, message: &Message) {
        self.update(message, |c, size| {
            c.messages_sent += 1;
            c.bytes_sent += size;
        });
    }

    fn on_message_received(&self, message: &Message) {
        self.update(message, |c, size| {
            c.messages_received += 1;
            c.bytes_received += size;
        });
    }

    fn on_message_dropped(&self, message: &Message) {
        self.update(message, |c, _| c.messages_dropped += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectAddress;

    fn message(message_type: MessageType) -> Message {
        Message::with_fields(ObjectAddress::new(1), message_type, &7u32)
    }

    #[test]
    fn test_statistics_count_per_type() {
        let stats = MessageStatistics::new();
        let mut monitors = Monitors::default();
        monitors.add(Box::new(stats.clone()));

        let reset = message(MessageType::ModelReset);
        let frame = message(MessageType::ViewFrame);
        monitors.notify(&Observation::Sent(&reset));
        monitors.notify(&Observation::Sent(&reset));
        monitors.notify(&Observation::Received(&frame));
        monitors.notify(&Observation::Dropped(&frame));

        let reset_counters = stats.get(MessageType::ModelReset);
        assert_eq!(reset_counters.messages_sent, 2);
        assert_eq!(reset_counters.bytes_sent, 12);
        let frame_counters = stats.get(MessageType::ViewFrame);
        assert_eq!(frame_counters.messages_received, 1);
        assert_eq!(frame_counters.messages_dropped, 1);
        assert_eq!(stats.snapshot().len(), 2);
    }

    struct Exploding;

    impl EndpointMonitor for Exploding {
        fn on_disconnect(&self) {
            panic!("boom");
        }
    }

    #[test]
    fn test_panicking_monitor_is_removed() {
        let mut monitors = Monitors::default();
        monitors.add(Box::new(Exploding));
        monitors.add(Box::new(MessageStatistics::new()));
        monitors.notify(&Observation::Disconnected);
        assert_eq!(monitors.monitors.len(), 1);
    }
}
