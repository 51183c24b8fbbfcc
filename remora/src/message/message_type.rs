use crate::{Error, Label};

/// Every message kind understood by both peers.
///
/// The numeric values are part of the wire format and must not change without
/// bumping [`PROTOCOL_VERSION`](crate::PROTOCOL_VERSION).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Label)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MessageType {
    ProtocolVersion = 1,
    ObjectAdded = 2,
    ObjectRemoved = 3,
    ObjectMonitored = 4,
    ObjectUnmonitored = 5,

    ModelCountRequest = 10,
    ModelCountReply = 11,
    ModelContentRequest = 12,
    ModelContentReply = 13,
    ModelHeaderRequest = 14,
    ModelHeaderReply = 15,
    ModelSetDataRequest = 16,
    ModelSetDataReply = 17,
    ModelRowsAdded = 18,
    ModelRowsRemoved = 19,
    ModelRowsMoved = 20,
    ModelColumnsAdded = 21,
    ModelColumnsRemoved = 22,
    ModelColumnsMoved = 23,
    ModelDataChanged = 24,
    ModelHeaderChanged = 25,
    ModelLayoutChanged = 26,
    ModelReset = 27,

    SelectionState = 30,
    SelectionStateRequest = 31,

    ViewFrame = 40,
    ViewClientReady = 41,
    ViewActive = 42,
    ViewRequestCompleteFrame = 43,
    ViewUserViewport = 44,
    ViewInputEvent = 45,
    ViewReset = 46,
}

impl MessageType {
    pub const ALL: [MessageType; 32] = [
        MessageType::ProtocolVersion,
        MessageType::ObjectAdded,
        MessageType::ObjectRemoved,
        MessageType::ObjectMonitored,
        MessageType::ObjectUnmonitored,
        MessageType::ModelCountRequest,
        MessageType::ModelCountReply,
        MessageType::ModelContentRequest,
        MessageType::ModelContentReply,
        MessageType::ModelHeaderRequest,
        MessageType::ModelHeaderReply,
        MessageType::ModelSetDataRequest,
        MessageType::ModelSetDataReply,
        MessageType::ModelRowsAdded,
        MessageType::ModelRowsRemoved,
        MessageType::ModelRowsMoved,
        MessageType::ModelColumnsAdded,
        MessageType::ModelColumnsRemoved,
        MessageType::ModelColumnsMoved,
        MessageType::ModelDataChanged,
        MessageType::ModelHeaderChanged,
        MessageType::ModelLayoutChanged,
        MessageType::ModelReset,
        MessageType::SelectionState,
        MessageType::SelectionStateRequest,
        MessageType::ViewFrame,
        MessageType::ViewClientReady,
        MessageType::ViewActive,
        MessageType::ViewRequestCompleteFrame,
        MessageType::ViewUserViewport,
        MessageType::ViewInputEvent,
        MessageType::ViewReset,
    ];

    /// Control messages travel on the reserved address and are consumed by the
    /// endpoint itself.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            MessageType::ProtocolVersion
                | MessageType::ObjectAdded
                | MessageType::ObjectRemoved
                | MessageType::ObjectMonitored
                | MessageType::ObjectUnmonitored
        )
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| *t as u8 == raw)
            .ok_or(Error::UnknownMessageType(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_round_trip() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::try_from(u8::from(t)).unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_wire_value() {
        assert!(matches!(
            MessageType::try_from(0),
            Err(Error::UnknownMessageType(0))
        ));
        assert!(MessageType::try_from(200).is_err());
    }

    #[test]
    fn test_label_is_variant_name() {
        assert_eq!(MessageType::ModelRowsAdded.label(), "ModelRowsAdded");
    }
}
