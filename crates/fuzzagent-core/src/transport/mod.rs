//! Multiplexed exec transport.
//!
//! One duplex connection carries several logical byte streams. Every frame
//! starts with a single byte naming its [`Channel`], followed by the payload.
//! [`ExecSession`] demultiplexes incoming frames into per-channel buffers and
//! resolves the remote command's return code from the error channel.

mod session;
mod status;
mod ws;

pub use session::{ExecSession, StreamOptions};
pub use status::parse_exit_status;
pub use ws::WsFrameSocket;

use async_trait::async_trait;

/// Logical stream inside an exec session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    Error = 3,
    Resize = 4,
}

impl Channel {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Channel::Stdin),
            1 => Some(Channel::Stdout),
            2 => Some(Channel::Stderr),
            3 => Some(Channel::Error),
            4 => Some(Channel::Resize),
            _ => None,
        }
    }
}

/// One frame received from the underlying connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Channel byte followed by payload
    Data(Vec<u8>),
    /// Peer closed the connection
    Close,
}

/// Errors produced by the exec transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection ended without a status on the error channel
    #[error("Broken connection: no exit status received")]
    BrokenConnection,

    #[error("Malformed exit status: {0}")]
    MalformedStatus(String),

    #[error("Exec session is closed")]
    Closed,

    #[error("Websocket failure: {0}")]
    Socket(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Frame-level duplex connection underneath an [`ExecSession`].
#[async_trait]
pub trait FrameSocket: Send {
    /// Send one binary frame.
    async fn send(&mut self, payload: Vec<u8>) -> TransportResult<()>;

    /// Receive the next data or close frame. `None` at end of stream.
    async fn recv(&mut self) -> Option<TransportResult<Frame>>;

    /// Close the connection with a close code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids() {
        for id in 0..=4u8 {
            assert_eq!(Channel::from_id(id).unwrap().id(), id);
        }
        assert_eq!(Channel::from_id(5), None);
        assert_eq!(Channel::Error.id(), 3);
    }
}
