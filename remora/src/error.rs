use std::sync::Arc;

use tokio::sync::{mpsc::error::SendError, oneshot::error::RecvError};

use crate::ObjectAddress;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Protocol version mismatch: local {local}, remote {remote}")]
    ProtocolVersionMismatch { local: u32, remote: u32 },

    #[error("The endpoint is disconnected.")]
    Disconnected,

    #[error("No object registered at address {0}.")]
    UnknownAddress(ObjectAddress),

    #[error("Path does not exist in the collection.")]
    PathNotFound,

    #[error("'{0}' is already registered.")]
    DuplicateRegistration(Arc<str>),

    #[error("All object addresses are in use.")]
    AddressSpaceExhausted,

    #[error("Unknown message type {0}.")]
    UnknownMessageType(u8),

    #[error("Malformed payload: {0}")]
    Decode(Arc<str>),

    #[error("Payload of {0} bytes exceeds the configured maximum.")]
    PayloadTooLarge(usize),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn decode(reason: impl Into<Arc<str>>) -> Self {
        Error::Decode(reason.into())
    }

    /// Whether the error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Disconnected | Error::IOError(_))
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Error::Disconnected
    }
}

impl From<RecvError> for Error {
    fn from(_: RecvError) -> Self {
        Error::Disconnected
    }
}
