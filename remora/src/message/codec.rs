use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{Error, Message, MessageType, ObjectAddress};

/// Frames [`Message`]s with a big endian `u32` length prefix.
///
/// Frames larger than `max_payload_size` are rejected in both directions.
#[derive(Debug)]
pub struct MessageCodec {
    frames: LengthDelimitedCodec,
    max_payload_size: usize,
}

impl MessageCodec {
    pub fn new(max_payload_size: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_type::<u32>()
            .max_frame_length(max_payload_size)
            .new_codec();
        Self {
            frames,
            max_payload_size,
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        let Some(mut frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        if frame.len() < 2 {
            return Err(Error::decode(format!(
                "frame of {} bytes has no header",
                frame.len()
            )));
        }
        let address = ObjectAddress::new(frame.get_u8());
        let message_type = MessageType::try_from(frame.get_u8())?;
        Ok(Some(Message {
            address,
            message_type,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Error> {
        let size = message.wire_size();
        if size > self.max_payload_size {
            return Err(Error::PayloadTooLarge(size));
        }
        let mut body = BytesMut::with_capacity(size);
        message.encode_body(&mut body);
        self.frames.encode(body.freeze(), dst)?;
        Ok(())
    }
}
