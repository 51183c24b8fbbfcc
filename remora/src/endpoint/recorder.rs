use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

use super::EndpointMonitor;
use crate::{Label, Message};

#[derive(Serialize)]
struct TrafficRecord<'a> {
    direction: &'a str,
    address: u8,
    message_type: &'a str,
    size: usize,
}

/// A monitor that records traffic to a file in JSON Lines format.
///
/// Each message becomes one object with its direction, address, type and
/// size. Payloads are not recorded.
pub struct Recorder {
    writer: Mutex<BufWriter<File>>,
}

impl Recorder {
    /// Create a new recorder that writes to the specified path.
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn record(&self, direction: &str, message: &Message) {
        let label = message.message_type.label();
        let record = TrafficRecord {
            direction,
            address: message.address.get(),
            message_type: &label,
            size: message.wire_size(),
        };
        let mut writer = self.writer.lock();
        if let Err(e) = serde_json::to_writer(&mut *writer, &record) {
            tracing::warn!(error = %e, "Recorder failed to serialize message");
            return;
        }
        let _ = writer.write_all(b"\n");
    }
}

impl EndpointMonitor for Recorder {
    fn on_message_sent(&self, message: &Message) {
        self.record("sent", message);
    }

    fn on_message_received(&self, message: &Message) {
        self.record("received", message);
    }

    fn on_message_dropped(&self, message: &Message) {
        self.record("dropped", message);
    }

    fn on_disconnect(&self) {
        let _ = self.writer.lock().flush();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::{MessageType, ObjectAddress};

    #[test]
    fn test_recorder_writes_json_lines() {
        let path = std::env::temp_dir().join("remora_recorder_test.jsonl");
        let recorder = Recorder::new(&path).expect("Failed to create recorder");

        let message = Message::with_fields(ObjectAddress::new(3), MessageType::ModelReset, &1u64);
        recorder.on_message_sent(&message);
        recorder.on_message_dropped(&message);
        recorder.on_disconnect();

        let mut content = String::new();
        File::open(&path)
            .expect("Failed to open log file")
            .read_to_string(&mut content)
            .expect("Failed to read log file");

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"direction\":\"sent\""));
        assert!(lines[0].contains("ModelReset"));
        assert!(lines[1].contains("dropped"));

        let _ = std::fs::remove_file(path);
    }
}
