//! Websocket-backed [`FrameSocket`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Frame, FrameSocket, TransportError, TransportResult};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exec connection over a websocket negotiated with the channel subprotocol.
pub struct WsFrameSocket {
    inner: Stream,
}

impl WsFrameSocket {
    pub fn new(inner: Stream) -> Self {
        Self { inner }
    }
}

fn socket_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::Socket(e.to_string())
}

#[async_trait]
impl FrameSocket for WsFrameSocket {
    async fn send(&mut self, payload: Vec<u8>) -> TransportResult<()> {
        self.inner
            .send(WsMessage::Binary(payload))
            .await
            .map_err(socket_error)
    }

    async fn recv(&mut self) -> Option<TransportResult<Frame>> {
        loop {
            match self.inner.next().await? {
                Ok(WsMessage::Binary(payload)) => return Some(Ok(Frame::Data(payload))),
                Ok(WsMessage::Text(payload)) => {
                    return Some(Ok(Frame::Data(payload.into_bytes())))
                }
                Ok(WsMessage::Close(_)) => return Some(Ok(Frame::Close)),
                // Pings are answered by tungstenite on the next write.
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
                Err(e) => return Some(Err(socket_error(e))),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> TransportResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.inner.close(Some(frame)).await.map_err(socket_error)
    }
}
