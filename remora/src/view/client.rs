use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Frame, InputEvent, Rect};
use crate::{
    Endpoint, Error, Label, Message, MessageHandler, MessageType, Result,
    message::wire::to_payload,
};

/// What a [`ViewClient`] receives from the probe.
#[derive(Debug, Clone, PartialEq, Label)]
pub enum ViewEvent {
    Frame(Frame),
    /// Drop the current picture. A complete frame follows.
    Reset,
}

/// Client side of a remote view.
///
/// Every received frame has to be acknowledged with
/// [`frame_displayed`](Self::frame_displayed) before the server sends the next.
#[derive(Debug, Clone)]
pub struct ViewClient {
    name: Arc<str>,
    endpoint: Endpoint,
}

impl ViewClient {
    pub async fn attach(
        endpoint: &Endpoint,
        name: impl Into<Arc<str>>,
    ) -> Result<(Self, UnboundedReceiver<ViewEvent>)> {
        let name = name.into();
        let (events, rx) = mpsc::unbounded_channel();
        endpoint
            .register_object(name.clone(), ViewClientHandler { events })?
            .address()
            .await?;
        Ok((
            Self {
                name,
                endpoint: endpoint.clone(),
            },
            rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start or stop the frame stream.
    pub fn set_active(&self, active: bool) -> Result<()> {
        self.send(MessageType::ViewActive, to_payload(&active))
    }

    /// The last frame is on screen; the server may send another.
    pub fn frame_displayed(&self) -> Result<()> {
        self.send(MessageType::ViewClientReady, Bytes::new())
    }

    /// Only `viewport` of the source is visible.
    pub fn set_viewport(&self, viewport: Rect) -> Result<()> {
        self.send(MessageType::ViewUserViewport, to_payload(&viewport))
    }

    pub fn request_complete_frame(&self) -> Result<()> {
        self.send(MessageType::ViewRequestCompleteFrame, Bytes::new())
    }

    pub fn send_input(&self, event: &InputEvent) -> Result<()> {
        self.send(MessageType::ViewInputEvent, to_payload(event))
    }

    pub fn detach(&self) -> Result<()> {
        self.endpoint.unregister_object(&self.name)
    }

    fn send(&self, message_type: MessageType, payload: Bytes) -> Result<()> {
        self.endpoint.send_to(self.name.clone(), message_type, payload)
    }
}

struct ViewClientHandler {
    events: UnboundedSender<ViewEvent>,
}

impl MessageHandler for ViewClientHandler {
    fn handle_message(&mut self, message: &Message) -> Result<()> {
        let event = match message.message_type {
            MessageType::ViewFrame => ViewEvent::Frame(message.decode()?),
            MessageType::ViewReset => ViewEvent::Reset,
            other => {
                return Err(Error::decode(format!(
                    "{} is not meant for a view client",
                    other.label()
                )));
            }
        };
        // the receiver may be gone
        let _ = self.events.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObjectAddress, view::Image};

    #[test]
    fn test_frames_and_resets_are_delivered() -> Result<()> {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut handler = ViewClientHandler { events };
        let frame = Frame {
            image: Image {
                width: 1,
                height: 1,
                data: Bytes::from_static(&[0, 0, 0, 0]),
                ..Image::default()
            },
            view_rect: Rect::new(0, 0, 1, 1),
            ..Frame::default()
        };
        let address = ObjectAddress::new(3);
        handler.handle_message(&Message::new(address, MessageType::ViewReset, Bytes::new()))?;
        handler.handle_message(&Message::with_fields(address, MessageType::ViewFrame, &frame))?;

        assert_eq!(rx.try_recv().ok(), Some(ViewEvent::Reset));
        assert_eq!(rx.try_recv().ok(), Some(ViewEvent::Frame(frame)));
        Ok(())
    }

    #[test]
    fn test_server_messages_are_rejected() {
        let (events, _rx) = mpsc::unbounded_channel();
        let mut handler = ViewClientHandler { events };
        let message = Message::with_fields(ObjectAddress::new(3), MessageType::ViewActive, &true);
        assert!(handler.handle_message(&message).is_err());
    }
}
