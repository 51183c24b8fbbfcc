use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    Error, Label, Result,
    message::wire::{Decode, Encode, wire_struct},
};

/// Integer rectangle in source coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

wire_struct!(Rect { x, y, width, height });

/// Affine transform from image to view coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub m11: f64,
    pub m12: f64,
    pub m21: f64,
    pub m22: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        m11: 1.0,
        m12: 0.0,
        m21: 0.0,
        m22: 1.0,
        dx: 0.0,
        dy: 0.0,
    };
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

wire_struct!(Transform { m11, m12, m21, m22, dx, dy });

/// Pixel layout of [`Image::data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Label)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageFormat {
    #[default]
    Argb32 = 1,
    Rgb32 = 2,
    Rgba8888 = 3,
    /// Encoded PNG file.
    Png = 4,
}

impl Encode for ImageFormat {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self as u8);
    }
}

impl Decode for ImageFormat {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        match u8::decode(buf)? {
            1 => Ok(ImageFormat::Argb32),
            2 => Ok(ImageFormat::Rgb32),
            3 => Ok(ImageFormat::Rgba8888),
            4 => Ok(ImageFormat::Png),
            other => Err(Error::decode(format!("unknown image format {other}"))),
        }
    }
}

/// Grabbed pixels. The bytes are opaque to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub width: i32,
    pub height: i32,
    pub format: ImageFormat,
    pub data: Bytes,
}

wire_struct!(Image { width, height, format, data });

/// One rendered frame of a remote view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub image: Image,
    /// Area of the source the image shows.
    pub view_rect: Rect,
    pub transform: Transform,
    /// Set for partial updates: the region of the previous frame this image replaces.
    pub sub_rect: Option<Rect>,
}

wire_struct!(Frame {
    image,
    view_rect,
    transform,
    sub_rect,
});

macro_rules! action {
    ($(#[$meta:meta])* $ty:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Label)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $ty {
            $($variant = $value),+
        }

        impl Encode for $ty {
            fn encode(&self, buf: &mut BytesMut) {
                buf.put_u8(*self as u8);
            }
        }

        impl Decode for $ty {
            fn decode(buf: &mut Bytes) -> Result<Self> {
                match u8::decode(buf)? {
                    $($value => Ok($ty::$variant),)+
                    other => Err(Error::decode(format!(
                        concat!("unknown ", stringify!($ty), " {}"),
                        other
                    ))),
                }
            }
        }
    };
}

action!(
    /// What a mouse event reports.
    ButtonAction {
        Press = 0,
        Release = 1,
        Move = 2,
        DoubleClick = 3,
    }
);

action!(TouchAction {
    Begin = 0,
    Update = 1,
    End = 2,
    Cancel = 3,
});

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchPoint {
    pub id: i32,
    pub x: f64,
    pub y: f64,
}

wire_struct!(TouchPoint { id, x, y });

/// User input captured on the client and replayed on the probe.
///
/// Positions are in source coordinates. Key codes, buttons and modifiers are
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Label)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputEvent {
    Key {
        pressed: bool,
        key: u32,
        modifiers: u32,
        text: String,
        auto_repeat: bool,
    },
    Mouse {
        action: ButtonAction,
        x: i32,
        y: i32,
        button: u32,
        buttons: u32,
        modifiers: u32,
    },
    Wheel {
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
        buttons: u32,
        modifiers: u32,
    },
    Touch {
        action: TouchAction,
        points: Vec<TouchPoint>,
        modifiers: u32,
    },
}

impl Encode for InputEvent {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            InputEvent::Key {
                pressed,
                key,
                modifiers,
                text,
                auto_repeat,
            } => {
                buf.put_u8(0);
                (pressed, key, modifiers, (text, auto_repeat)).encode(buf);
            }
            InputEvent::Mouse {
                action,
                x,
                y,
                button,
                buttons,
                modifiers,
            } => {
                buf.put_u8(1);
                (action, x, y, (button, buttons, modifiers)).encode(buf);
            }
            InputEvent::Wheel {
                x,
                y,
                delta_x,
                delta_y,
                buttons,
                modifiers,
            } => {
                buf.put_u8(2);
                (x, y, (delta_x, delta_y), (buttons, modifiers)).encode(buf);
            }
            InputEvent::Touch {
                action,
                points,
                modifiers,
            } => {
                buf.put_u8(3);
                (action, points, modifiers).encode(buf);
            }
        }
    }
}

impl Decode for InputEvent {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        match u8::decode(buf)? {
            0 => {
                let (pressed, key, modifiers, (text, auto_repeat)) =
                    <(bool, u32, u32, (String, bool))>::decode(buf)?;
                Ok(InputEvent::Key {
                    pressed,
                    key,
                    modifiers,
                    text,
                    auto_repeat,
                })
            }
            1 => {
                let (action, x, y, (button, buttons, modifiers)) =
                    <(ButtonAction, i32, i32, (u32, u32, u32))>::decode(buf)?;
                Ok(InputEvent::Mouse {
                    action,
                    x,
                    y,
                    button,
                    buttons,
                    modifiers,
                })
            }
            2 => {
                let (x, y, (delta_x, delta_y), (buttons, modifiers)) =
                    <(i32, i32, (i32, i32), (u32, u32))>::decode(buf)?;
                Ok(InputEvent::Wheel {
                    x,
                    y,
                    delta_x,
                    delta_y,
                    buttons,
                    modifiers,
                })
            }
            3 => {
                let (action, points, modifiers) = <(TouchAction, Vec<TouchPoint>, u32)>::decode(buf)?;
                Ok(InputEvent::Touch {
                    action,
                    points,
                    modifiers,
                })
            }
            other => Err(Error::decode(format!("unknown input event {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::wire::to_payload;

    #[test]
    fn test_frame_layout_starts_with_image() {
        let frame = Frame {
            image: Image {
                width: 2,
                height: 1,
                format: ImageFormat::Rgb32,
                data: Bytes::from_static(&[9, 9]),
            },
            ..Frame::default()
        };
        let payload = to_payload(&frame);
        assert_eq!(&payload[..13], &[0, 0, 0, 2, 0, 0, 0, 1, 2, 0, 0, 0, 2]);
        // view rect, transform, absent sub rect
        assert_eq!(payload.len(), 15 + 16 + 48 + 1);
        let mut payload = payload;
        assert_eq!(Frame::decode(&mut payload).unwrap(), frame);
    }

    #[test]
    fn test_input_events_decode_back() {
        let events = [
            InputEvent::Key {
                pressed: true,
                key: 0x41,
                modifiers: 0,
                text: "a".into(),
                auto_repeat: false,
            },
            InputEvent::Wheel {
                x: 10,
                y: 20,
                delta_x: 0,
                delta_y: -120,
                buttons: 0,
                modifiers: 0,
            },
            InputEvent::Touch {
                action: TouchAction::Update,
                points: vec![TouchPoint { id: 1, x: 1.5, y: 2.5 }],
                modifiers: 0,
            },
        ];
        for event in events {
            let mut payload = to_payload(&event);
            assert_eq!(InputEvent::decode(&mut payload).unwrap(), event);
        }
    }

    #[test]
    fn test_unknown_image_format_is_rejected() {
        let mut raw = Bytes::from_static(&[7]);
        assert!(ImageFormat::decode(&mut raw).is_err());
    }
}
