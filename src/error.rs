//! The connection-level error surface.

use crate::client::WsState;
use crate::frame::FrameError;
use crate::handshake::HandshakeError;
use crate::transport::TransportError;

#[derive(thiserror::Error, Debug)]
pub enum WsError {
    /// `connect()` was called while the client was not in the CLOSED
    /// state.
    #[error("connection refused: client state is {0:?}")]
    ConnectionRefused(WsState),
    /// `send()` was called while the client was neither OPEN nor
    /// CLOSING.
    #[error("client is not connected")]
    NotConnected,
    /// A requested sub-protocol token violates the token grammar.
    #[error("invalid sub-protocol token `{0}`")]
    InvalidProtocol(String),
    /// A requested sub-protocol repeats after case-folding.
    #[error("duplicated sub-protocol `{0}`")]
    DuplicateProtocol(String),
    #[error(transparent)]
    Uri(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// A text payload or close reason was not valid UTF-8.
    #[error("invalid UTF-8 payload")]
    InvalidUtf8,
    /// A close frame arrived with a 1-byte payload.
    #[error("invalid close payload")]
    InvalidClose,
    /// The read loop could not produce a message.
    #[error("failed to read message")]
    ReadFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
