//! Remote views: frames of a live surface streamed to the observer, input
//! streamed back.
//!
//! The server grabs a frame only when the client has acknowledged the
//! previous one, so at most one frame is ever in flight.

mod client;
mod gate;
mod server;
mod types;

pub use client::{ViewClient, ViewEvent};
pub use gate::GrabRequest;
pub use server::{FrameGrabber, ViewFrameServer};
pub use types::{ButtonAction, Frame, Image, ImageFormat, InputEvent, Rect, TouchAction, TouchPoint, Transform};
