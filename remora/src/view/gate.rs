use super::Rect;

/// What the grabber is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabRequest {
    /// Cover the whole source, ignoring the client's viewport.
    pub full: bool,
    /// Area the client shows, when it is enough to grab that.
    pub region: Option<Rect>,
}

/// Backpressure state of one frame stream.
///
/// A grab may start only while the client shows the view, has acknowledged
/// the previous frame, no grab is running and the source changed since the
/// last one. That keeps at most one frame in flight.
#[derive(Debug, Clone)]
pub(crate) struct FrameGate {
    client_active: bool,
    client_ready: bool,
    grabber_ready: bool,
    source_changed: bool,
    pending_reset: bool,
    pending_complete_frame: bool,
    viewport: Option<Rect>,
    last_sent: Option<Rect>,
}

impl Default for FrameGate {
    fn default() -> Self {
        Self {
            client_active: false,
            client_ready: true,
            grabber_ready: true,
            source_changed: false,
            pending_reset: false,
            pending_complete_frame: false,
            viewport: None,
            last_sent: None,
        }
    }
}

impl FrameGate {
    pub fn can_grab(&self) -> bool {
        self.client_active && self.client_ready && self.grabber_ready && self.source_changed
    }

    pub fn is_active(&self) -> bool {
        self.client_active
    }

    pub fn last_sent(&self) -> Option<Rect> {
        self.last_sent
    }

    pub fn source_changed(&mut self) -> bool {
        self.source_changed = true;
        self.can_grab()
    }

    /// Showing the view again always needs a fresh frame.
    pub fn set_active(&mut self, active: bool) -> bool {
        if active && !self.client_active {
            self.source_changed = true;
            self.client_ready = true;
        }
        self.client_active = active;
        self.can_grab()
    }

    pub fn client_view_updated(&mut self) -> bool {
        self.client_ready = true;
        self.can_grab()
    }

    pub fn set_viewport(&mut self, viewport: Rect) -> bool {
        if self.viewport != Some(viewport) {
            self.viewport = Some(viewport);
            self.source_changed = true;
        }
        self.can_grab()
    }

    pub fn request_complete_frame(&mut self) -> bool {
        self.pending_complete_frame = true;
        self.source_changed = true;
        self.can_grab()
    }

    /// The client must drop what it shows. The next frame is complete.
    pub fn reset(&mut self) -> bool {
        self.pending_reset = true;
        self.pending_complete_frame = true;
        self.source_changed = true;
        self.last_sent = None;
        self.can_grab()
    }

    /// Start a grab if the gate is open.
    pub fn begin_grab(&mut self) -> Option<GrabRequest> {
        if !self.can_grab() {
            return None;
        }
        self.grabber_ready = false;
        self.source_changed = false;
        let full = std::mem::take(&mut self.pending_complete_frame) || self.viewport.is_none();
        Some(GrabRequest {
            full,
            region: if full { None } else { self.viewport },
        })
    }

    /// The grabber gave up without a frame.
    pub fn grab_skipped(&mut self) -> bool {
        self.grabber_ready = true;
        self.can_grab()
    }

    /// A frame left for the client. Returns whether a reset has to go first.
    pub fn frame_sent(&mut self, view_rect: Rect) -> bool {
        self.client_ready = false;
        self.grabber_ready = true;
        self.last_sent = Some(view_rect);
        std::mem::take(&mut self.pending_reset)
    }
}
