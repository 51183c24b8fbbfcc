use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;

use super::{
    Frame, InputEvent, Rect,
    gate::{FrameGate, GrabRequest},
};
use crate::{Endpoint, Error, Label, Message, MessageHandler, MessageType, Result, message::wire::to_payload};

/// Produces frames for a [`ViewFrameServer`].
///
/// `grab` only starts the work. The result is handed back through
/// [`ViewFrameServer::send_frame`], or [`ViewFrameServer::skip_frame`] when
/// there is nothing to show.
pub trait FrameGrabber: Send + 'static {
    fn grab(&mut self, request: GrabRequest);
}

impl FrameGrabber for UnboundedSender<GrabRequest> {
    fn grab(&mut self, request: GrabRequest) {
        if self.send(request).is_err() {
            tracing::debug!("Frame grabber is gone");
        }
    }
}

struct ViewState {
    gate: FrameGate,
    /// Cancels the running coalescing timer.
    timer: Option<CancellationToken>,
}

struct ViewShared {
    name: Arc<str>,
    endpoint: Endpoint,
    debounce: Duration,
    runtime: Handle,
    state: Mutex<ViewState>,
    grabber: Mutex<Box<dyn FrameGrabber>>,
    input: UnboundedSender<InputEvent>,
}

impl ViewShared {
    /// Start the coalescing timer when the gate is open and none runs yet.
    fn arm(self: &Arc<Self>, state: &mut ViewState) {
        if !state.gate.can_grab() || state.timer.is_some() {
            return;
        }
        let token = CancellationToken::new();
        state.timer = Some(token.clone());
        let shared = Arc::downgrade(self);
        let debounce = self.debounce;
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = coalesce(debounce) => fire(shared),
            }
        });
    }

    fn update(self: &Arc<Self>, f: impl FnOnce(&mut FrameGate) -> bool) {
        let mut state = self.state.lock();
        if f(&mut state.gate) {
            self.arm(&mut state);
        }
    }

    fn set_active(self: &Arc<Self>, active: bool) {
        let mut state = self.state.lock();
        state.gate.set_active(active);
        if active {
            self.arm(&mut state);
        } else if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        tracing::debug!(view = %self.name, active, "View activity changed");
    }

    fn send(&self, message_type: MessageType, payload: impl Into<Bytes>) -> Result<()> {
        self.endpoint.send_to(self.name.clone(), message_type, payload)
    }
}

async fn coalesce(debounce: Duration) {
    if debounce.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(debounce).await;
    }
}

/// The timer ran out: ask for a frame if the gate is still open.
fn fire(shared: Weak<ViewShared>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let request = {
        let mut state = shared.state.lock();
        state.timer = None;
        state.gate.begin_grab()
    };
    if let Some(request) = request {
        tracing::trace!(view = %shared.name, full = request.full, "Requesting frame");
        shared.grabber.lock().grab(request);
    }
}

/// Streams frames of one view to the peer's [`ViewClient`](super::ViewClient).
///
/// Changes of the source are coalesced and a new frame is only requested once
/// the client acknowledged the previous one, so a slow client never builds up
/// a queue no matter how often the source changes.
///
/// # Examples
///
/// ```rust,ignore
/// let (grabs, mut requests) = tokio::sync::mpsc::unbounded_channel();
/// let (server, mut input) = ViewFrameServer::serve(&endpoint, "view", grabs).await?;
/// server.source_changed();
/// if let Some(request) = requests.recv().await {
///     server.send_frame(render(request))?;
/// }
/// ```
#[derive(Clone)]
pub struct ViewFrameServer {
    shared: Arc<ViewShared>,
}

impl ViewFrameServer {
    /// Register the view under `name`. Input events sent by the client are
    /// delivered to the returned receiver.
    pub async fn serve<G: FrameGrabber>(
        endpoint: &Endpoint,
        name: impl Into<Arc<str>>,
        grabber: G,
    ) -> Result<(Self, UnboundedReceiver<InputEvent>)> {
        let name = name.into();
        let (input, events) = mpsc::unbounded_channel();
        let shared = Arc::new(ViewShared {
            name: name.clone(),
            endpoint: endpoint.clone(),
            debounce: endpoint.config().frame_debounce,
            runtime: Handle::current(),
            state: Mutex::new(ViewState {
                gate: FrameGate::default(),
                timer: None,
            }),
            grabber: Mutex::new(Box::new(grabber)),
            input,
        });
        endpoint
            .register_object(
                name,
                ViewHandler {
                    shared: shared.clone(),
                },
            )?
            .address()
            .await?;
        Ok((Self { shared }, events))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The source changed; a frame follows once the client can take one.
    pub fn source_changed(&self) {
        self.shared.update(FrameGate::source_changed);
    }

    /// Send the frame produced for the last [`GrabRequest`].
    ///
    /// A frame larger than [`Config::max_payload_size`](crate::Config) is
    /// dropped with [`Error::PayloadTooLarge`] and the grabber may be asked
    /// again, as after [`skip_frame`](Self::skip_frame).
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        let payload = to_payload(&frame);
        let size = payload.len() + 2;
        if size > self.shared.endpoint.config().max_payload_size {
            tracing::warn!(view = %self.shared.name, size, "Frame exceeds the payload limit");
            self.shared.update(FrameGate::grab_skipped);
            return Err(Error::PayloadTooLarge(size));
        }
        let mut state = self.shared.state.lock();
        if state.gate.frame_sent(frame.view_rect) {
            self.shared.send(MessageType::ViewReset, Bytes::new())?;
        }
        self.shared.send(MessageType::ViewFrame, payload)
    }

    /// The grabber had nothing to send for the last request.
    pub fn skip_frame(&self) {
        self.shared.update(FrameGate::grab_skipped);
    }

    /// Acknowledge the last frame on behalf of the client.
    pub fn client_view_updated(&self) {
        self.shared.update(FrameGate::client_view_updated);
    }

    /// The next frame covers the whole source.
    pub fn request_complete_frame(&self) {
        self.shared.update(FrameGate::request_complete_frame);
    }

    pub fn set_view_active(&self, active: bool) {
        self.shared.set_active(active);
    }

    /// Make the client drop what it shows before the next frame.
    pub fn reset_view(&self) {
        self.shared.update(FrameGate::reset);
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().gate.is_active()
    }

    /// View rectangle of the last frame sent.
    pub fn last_sent(&self) -> Option<Rect> {
        self.shared.state.lock().gate.last_sent()
    }

    pub fn unregister(&self) -> Result<()> {
        self.shared.set_active(false);
        self.shared.endpoint.unregister_object(&self.shared.name)
    }
}

impl std::fmt::Debug for ViewFrameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewFrameServer")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

struct ViewHandler {
    shared: Arc<ViewShared>,
}

impl MessageHandler for ViewHandler {
    fn handle_message(&mut self, message: &Message) -> Result<()> {
        match message.message_type {
            MessageType::ViewClientReady => self.shared.update(FrameGate::client_view_updated),
            MessageType::ViewActive => self.shared.set_active(message.decode()?),
            MessageType::ViewRequestCompleteFrame => {
                self.shared.update(FrameGate::request_complete_frame)
            }
            MessageType::ViewUserViewport => {
                let viewport: Rect = message.decode()?;
                self.shared.update(|gate| gate.set_viewport(viewport));
            }
            MessageType::ViewInputEvent => {
                let event: InputEvent = message.decode()?;
                tracing::trace!(view = %self.shared.name, event = %event.label(), "Input event");
                // nobody listening is fine
                let _ = self.shared.input.send(event);
            }
            other => {
                return Err(Error::decode(format!(
                    "{} is not meant for a view server",
                    other.label()
                )));
            }
        }
        Ok(())
    }

    fn peer_changed(&mut self, present: bool) {
        if !present {
            self.shared.set_active(false);
        }
    }

    fn unregistered(&mut self) {
        self.shared.set_active(false);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::{Config, ObjectAddress, endpoint::Command};

    fn server(
        debounce: Duration,
    ) -> (
        ViewFrameServer,
        ViewHandler,
        UnboundedReceiver<GrabRequest>,
        UnboundedReceiver<Command>,
    ) {
        server_with(Config::default().with_frame_debounce(debounce))
    }

    fn server_with(
        config: Config,
    ) -> (
        ViewFrameServer,
        ViewHandler,
        UnboundedReceiver<GrabRequest>,
        UnboundedReceiver<Command>,
    ) {
        let debounce = config.frame_debounce;
        let (endpoint, commands) = Endpoint::detached(config);
        let (grabs, requests) = mpsc::unbounded_channel();
        let (input, _events) = mpsc::unbounded_channel();
        let shared = Arc::new(ViewShared {
            name: "view".into(),
            endpoint,
            debounce,
            runtime: Handle::current(),
            state: Mutex::new(ViewState {
                gate: FrameGate::default(),
                timer: None,
            }),
            grabber: Mutex::new(Box::new(grabs)),
            input,
        });
        let handler = ViewHandler {
            shared: shared.clone(),
        };
        (ViewFrameServer { shared }, handler, requests, commands)
    }

    fn sent_types(commands: &mut UnboundedReceiver<Command>) -> Vec<MessageType> {
        let mut types = Vec::new();
        loop {
            match commands.try_recv() {
                Ok(Command::SendTo { message_type, .. }) => types.push(message_type),
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return types,
            }
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_are_coalesced_into_one_grab() {
        let (server, _handler, mut requests, _commands) = server(Duration::from_millis(20));
        server.set_view_active(true);
        for _ in 0..10 {
            server.source_changed();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(requests.try_recv().is_ok());
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivation_cancels_timer() {
        let (server, _handler, mut requests, _commands) = server(Duration::from_millis(20));
        server.set_view_active(true);
        server.set_view_active(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(requests.try_recv().is_err());

        server.set_view_active(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(requests.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_client_messages_drive_the_gate() -> Result<()> {
        let (server, mut handler, mut requests, mut commands) = server(Duration::ZERO);
        let active = Message::with_fields(ObjectAddress::new(1), MessageType::ViewActive, &true);
        handler.handle_message(&active)?;
        settle().await;
        let request = requests.try_recv().expect("grab after activation");
        assert!(request.full);

        server.send_frame(Frame::default())?;
        assert_eq!(sent_types(&mut commands), vec![MessageType::ViewFrame]);
        server.source_changed();
        settle().await;
        assert!(requests.try_recv().is_err());

        let ready = Message::new(ObjectAddress::new(1), MessageType::ViewClientReady, Bytes::new());
        handler.handle_message(&ready)?;
        settle().await;
        assert!(requests.try_recv().is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_precedes_next_frame() -> Result<()> {
        let (server, _handler, mut requests, mut commands) = server(Duration::ZERO);
        server.set_view_active(true);
        settle().await;
        requests.try_recv().expect("first grab");
        server.reset_view();
        server.skip_frame();
        settle().await;
        requests.try_recv().expect("grab after reset");
        server.send_frame(Frame::default())?;
        assert_eq!(
            sent_types(&mut commands),
            vec![MessageType::ViewReset, MessageType::ViewFrame]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_frame_keeps_the_gate_usable() -> Result<()> {
        let config = Config::default()
            .with_frame_debounce(Duration::ZERO)
            .with_max_payload_size(1024);
        let (server, _handler, mut requests, mut commands) = server_with(config);
        server.set_view_active(true);
        settle().await;
        requests.try_recv().expect("first grab");
        server.reset_view();

        let mut frame = Frame::default();
        frame.image.data = Bytes::from(vec![0u8; 4096]);
        assert!(matches!(server.send_frame(frame), Err(Error::PayloadTooLarge(_))));
        assert!(sent_types(&mut commands).is_empty());
        assert_eq!(server.last_sent(), None);

        // nothing is in flight, the pending reset still goes first
        settle().await;
        requests.try_recv().expect("grab after the dropped frame");
        server.send_frame(Frame::default())?;
        assert_eq!(
            sent_types(&mut commands),
            vec![MessageType::ViewReset, MessageType::ViewFrame]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_input_is_forwarded() -> Result<()> {
        let (endpoint, _commands) = Endpoint::detached(Config::default());
        let (input, mut events) = mpsc::unbounded_channel();
        let shared = Arc::new(ViewShared {
            name: "view".into(),
            endpoint,
            debounce: Duration::ZERO,
            runtime: Handle::current(),
            state: Mutex::new(ViewState {
                gate: FrameGate::default(),
                timer: None,
            }),
            grabber: Mutex::new(Box::new(mpsc::unbounded_channel::<GrabRequest>().0)),
            input,
        });
        let mut handler = ViewHandler { shared };
        let event = InputEvent::Key {
            pressed: true,
            key: 32,
            modifiers: 0,
            text: " ".into(),
            auto_repeat: false,
        };
        handler.handle_message(&Message::with_fields(
            ObjectAddress::new(1),
            MessageType::ViewInputEvent,
            &event,
        ))?;
        assert_eq!(events.try_recv().ok(), Some(event));
        Ok(())
    }
}
