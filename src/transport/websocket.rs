//! Full-duplex WebSocket transports.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::{Payload, Transport, TransportError, TransportEvent, TransportFactory, TransportKind};
use crate::Result;
use crate::config::ClientConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for the TCP, TLS and upgrade handshakes together.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the primary WebSocket transport, requesting compressed payloads when enabled.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFactory;

#[async_trait]
impl TransportFactory for WebSocketFactory {
    async fn open(&self, config: &ClientConfig) -> Result<Box<dyn Transport>> {
        let url = config.endpoints.websocket_url(config.compression)?;
        let transport =
            WebSocketTransport::connect(TransportKind::WebSocket, &url, config.compression).await?;
        Ok(Box::new(transport))
    }
}

/// Builds a WebSocket transport on the uncompressed locator, for servers that cannot
/// compress.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyWebSocketFactory;

#[async_trait]
impl TransportFactory for LegacyWebSocketFactory {
    async fn open(&self, config: &ClientConfig) -> Result<Box<dyn Transport>> {
        let url = config.endpoints.websocket_url(false)?;
        let transport =
            WebSocketTransport::connect(TransportKind::WebSocketLegacy, &url, false).await?;
        Ok(Box::new(transport))
    }
}

/// An open WebSocket stream.
pub struct WebSocketTransport {
    kind: TransportKind,
    stream: WsStream,
    /// Whether binary frames on this stream carry compressed data
    compressed: bool,
}

impl WebSocketTransport {
    async fn connect(kind: TransportKind, url: &Url, compressed: bool) -> Result<Self> {
        #[cfg(feature = "tracing")]
        tracing::debug!(%kind, %url, "Connecting WebSocket");

        let (stream, _) = timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_elapsed| TransportError::Timeout(CONNECT_TIMEOUT))?
            .map_err(TransportError::WebSocket)?;

        Ok(Self {
            kind,
            stream,
            compressed,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::WebSocket)?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        // `StreamExt::next` is cancel-safe, so no frame is lost when this future is dropped
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Payload(Payload::Text(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return TransportEvent::Payload(Payload::Binary {
                        data: data.to_vec(),
                        compressed: self.compressed,
                    });
                }
                Some(Ok(Message::Close(_))) | None => return TransportEvent::Closed,
                Some(Err(e)) => return TransportEvent::Error(TransportError::WebSocket(e).into()),
                // Ping/pong is answered by tungstenite itself
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(kind = %self.kind, "Error closing WebSocket: {e}");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
