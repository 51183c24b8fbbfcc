use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::MessageHandler;
use crate::{Message, MessageType, ObjectAddress, Result};

pub(crate) enum Command {
    Register {
        name: Arc<str>,
        handler: Box<dyn MessageHandler>,
        reply: oneshot::Sender<Result<ObjectAddress>>,
    },
    Unregister(Arc<str>),
    Send(Message),
    SendTo {
        name: Arc<str>,
        message_type: MessageType,
        payload: Bytes,
    },
    SetMonitored {
        name: Arc<str>,
        monitored: bool,
    },
    RemoteAddress {
        name: Arc<str>,
        reply: oneshot::Sender<Option<ObjectAddress>>,
    },
    WaitForObject {
        name: Arc<str>,
        reply: oneshot::Sender<Result<ObjectAddress>>,
    },
    #[cfg(feature = "monitoring")]
    AddMonitor(Box<dyn super::EndpointMonitor>),
    Close,
}

/// What the dispatcher reports to monitors.
#[cfg_attr(not(feature = "monitoring"), allow(dead_code))]
pub(crate) enum Observation<'a> {
    Sent(&'a Message),
    Received(&'a Message),
    Dropped(&'a Message),
    Disconnected,
}
