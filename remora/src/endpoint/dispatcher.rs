use std::sync::Arc;

use tokio::{
    select,
    sync::mpsc::{Receiver, UnboundedReceiver, UnboundedSender},
};

use super::{
    Shared,
    command::{Command, Observation},
    objects::{Dispatch, LocalObjects, RemoteObjects},
};
use crate::{Error, Label, Message, MessageType, ObjectAddress, Result};

/// Owns the address tables of one endpoint and routes every message.
///
/// Runs as a single task: handlers execute here, table mutations happen only
/// here, and everything leaving the endpoint passes through `write` on its way
/// to the single writer task.
pub(crate) struct Dispatcher {
    commands: UnboundedReceiver<Command>,
    inbound: Receiver<Message>,
    outbound: UnboundedSender<Message>,
    local: LocalObjects,
    remote: RemoteObjects,
    shared: Arc<Shared>,
    #[cfg(feature = "monitoring")]
    monitors: super::monitor::Monitors,
}

impl Dispatcher {
    pub fn new(
        commands: UnboundedReceiver<Command>,
        inbound: Receiver<Message>,
        outbound: UnboundedSender<Message>,
        shared: Arc<Shared>,
        max_pending_messages: usize,
    ) -> Self {
        Self {
            commands,
            inbound,
            outbound,
            local: LocalObjects::default(),
            remote: RemoteObjects::new(max_pending_messages),
            shared,
            #[cfg(feature = "monitoring")]
            monitors: super::monitor::Monitors::default(),
        }
    }

    pub async fn run(mut self) {
        let cancel_token = self.shared.cancel_token.clone();
        loop {
            select! {
                biased;
                message = self.inbound.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancel_token.cancelled() => break,
            }
        }
        self.teardown();
    }

    fn dispatch(&mut self, message: Message) {
        if !message.address.is_valid() {
            if let Err(e) = self.control(&message) {
                tracing::warn!(
                    message_type = %message.message_type.label(),
                    error = %e,
                    "Dropping malformed control message"
                );
            }
            return;
        }

        match self.local.dispatch(&message) {
            Dispatch::Delivered => {
                tracing::trace!(
                    address = %message.address,
                    message_type = %message.message_type.label(),
                    "Message delivered"
                );
                self.observe(Observation::Received(&message));
            }
            Dispatch::Dropped => {
                tracing::trace!(
                    address = %message.address,
                    message_type = %message.message_type.label(),
                    "No object at address, dropping message"
                );
                self.observe(Observation::Dropped(&message));
            }
            Dispatch::Failed(e) => {
                tracing::warn!(
                    address = %message.address,
                    message_type = %message.message_type.label(),
                    error = %e,
                    "Handler rejected message"
                );
                self.observe(Observation::Received(&message));
            }
        }
    }

    fn control(&mut self, message: &Message) -> Result<()> {
        use MessageType::*;
        match message.message_type {
            ObjectAdded => {
                let (name, address): (String, u8) = message.decode()?;
                let name: Arc<str> = name.into();
                let address = ObjectAddress::new(address);
                tracing::debug!(%name, %address, "Peer registered object");
                for queued in self.remote.added(name.clone(), address) {
                    self.write(queued);
                }
                if self.remote.is_monitored(&name) {
                    self.write(Message::control(ObjectMonitored, &address.get()));
                }
                if let Some(object) = self.local.by_name_mut(&name) {
                    object.handler.peer_changed(true);
                }
            }
            ObjectRemoved => {
                let name: String = message.decode()?;
                tracing::debug!(%name, "Peer unregistered object");
                self.remote.removed(&name);
                if let Some(object) = self.local.by_name_mut(&name) {
                    if object.monitored {
                        object.monitored = false;
                        object.handler.monitored_changed(false);
                    }
                    object.handler.peer_changed(false);
                }
            }
            ObjectMonitored | ObjectUnmonitored => {
                let monitored = message.message_type == ObjectMonitored;
                let address = ObjectAddress::new(message.decode::<u8>()?);
                match self.local.get_mut(address) {
                    Some(object) if object.monitored != monitored => {
                        tracing::debug!(name = %object.name, monitored, "Monitoring changed");
                        object.monitored = monitored;
                        object.handler.monitored_changed(monitored);
                    }
                    Some(_) => {}
                    // the object was unregistered while the notice was on its way
                    None => tracing::trace!(%address, monitored, "Monitoring notice for unknown address"),
                }
            }
            ProtocolVersion => {
                tracing::trace!("Ignoring repeated version announcement");
            }
            other => {
                return Err(Error::decode(format!(
                    "{} is not a control message",
                    other.label()
                )));
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Register {
                name,
                handler,
                reply,
            } => {
                let result = self.local.register(name.clone(), handler);
                if let Ok(address) = result {
                    tracing::debug!(%name, %address, "Object registered");
                    self.write(Message::control(
                        MessageType::ObjectAdded,
                        &(name.as_ref(), address.get()),
                    ));
                    if self.remote.address(&name).is_some() {
                        if let Some(object) = self.local.by_name_mut(&name) {
                            object.handler.peer_changed(true);
                        }
                    }
                }
                let _ = reply.send(result);
            }
            Command::Unregister(name) => {
                if let Some((address, mut object)) = self.local.unregister(&name) {
                    tracing::debug!(%name, %address, "Object unregistered");
                    self.write(Message::control(MessageType::ObjectRemoved, name.as_ref()));
                    object.handler.unregistered();
                }
            }
            Command::Send(message) => self.write(message),
            Command::SendTo {
                name,
                message_type,
                payload,
            } => match self.remote.address(&name) {
                Some(address) => self.write(Message::new(address, message_type, payload)),
                None => {
                    if !self.remote.enqueue(name.clone(), message_type, payload) {
                        tracing::warn!(
                            %name,
                            message_type = %message_type.label(),
                            "Backlog for unannounced objects is full, dropping message"
                        );
                    }
                }
            },
            Command::SetMonitored { name, monitored } => {
                let address = self.remote.address(&name);
                if let (true, Some(address)) =
                    (self.remote.set_monitored(name.clone(), monitored), address)
                {
                    let message_type = if monitored {
                        MessageType::ObjectMonitored
                    } else {
                        MessageType::ObjectUnmonitored
                    };
                    self.write(Message::control(message_type, &address.get()));
                }
            }
            Command::RemoteAddress { name, reply } => {
                let _ = reply.send(self.remote.address(&name));
            }
            Command::WaitForObject { name, reply } => self.remote.wait(name, reply),
            #[cfg(feature = "monitoring")]
            Command::AddMonitor(monitor) => self.monitors.add(monitor),
            Command::Close => return false,
        }
        true
    }

    fn write(&mut self, message: Message) {
        self.observe(Observation::Sent(&message));
        if self.outbound.send(message).is_err() {
            self.shared.disconnect();
        }
    }

    fn teardown(&mut self) {
        self.shared.disconnect();
        self.observe(Observation::Disconnected);
        self.commands.close();
        self.remote.clear();
        for mut object in self.local.drain() {
            if object.monitored {
                object.handler.monitored_changed(false);
            }
            object.handler.peer_changed(false);
            object.handler.unregistered();
        }
        tracing::debug!("Dispatcher stopped");
    }

    #[cfg(feature = "monitoring")]
    #[inline]
    fn observe(&mut self, observation: Observation<'_>) {
        self.monitors.notify(&observation);
    }

    #[cfg(not(feature = "monitoring"))]
    #[inline(always)]
    fn observe(&mut self, _observation: Observation<'_>) {}
}
