//! WebSocket Transport
//!
//! tokio-tungstenite adapter behind the [`Transport`] port. Maps text and
//! close frames onto the wire model and ignores everything else (pings and
//! pongs are handled by the library).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::application::ports::{Transport, TransportError, WireEvent, WireFrame, WireSink, WireSource};

impl From<tungstenite::Error> for TransportError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Socket(error.to_string())
    }
}

/// Production transport over TLS WebSockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource), TransportError> {
        let (socket, response) = connect_async(url)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (write, read) = socket.split();

        let sink: WireSink = Box::pin(write.sink_map_err(TransportError::from).with(
            |frame: WireFrame| async move {
                Ok::<Message, TransportError>(match frame {
                    WireFrame::Text(text) => Message::Text(text.into()),
                    WireFrame::Close { code } => Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: "client disconnect".into(),
                    })),
                })
            },
        ));

        let source: WireSource = Box::pin(read.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(WireEvent::Text(text.to_string()))),
                Ok(Message::Close(frame)) => Some(Ok(WireEvent::Closed {
                    code: frame.map_or(1005, |frame| frame.code.into()),
                })),
                Ok(_) => None,
                Err(error) => Some(Err(TransportError::from(error))),
            }
        }));

        Ok((sink, source))
    }
}
