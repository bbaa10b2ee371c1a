//! WebSocket transport.
//!
//! Connects to `{server_url}/realtime/ws` with the token in an
//! `Authorization: Bearer` header and exchanges JSON [`WireMessage`] text frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::transport::{RealtimeTransport, TransportConnector, TransportError, WireMessage};
use super::TransportMode;

pub const WEBSOCKET_PATH: &str = "/realtime/ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Turn an http(s) server URL into the ws(s) endpoint URL.
pub fn websocket_url(server_url: &str) -> String {
    let base = server_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{WEBSOCKET_PATH}")
}

pub struct WebSocketConnector {
    url: String,
    timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(server_url: &str, timeout: Duration) -> Self {
        Self {
            url: websocket_url(server_url),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(&self, token: &str) -> Result<Arc<dyn RealtimeTransport>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(TransportError::connection)?;
        let header = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Unauthorized(format!("invalid token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        debug!(url = %self.url, "opening websocket");
        let stream = match tokio::time::timeout(self.timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(tungstenite::Error::Http(response))) => {
                let status = response.status().as_u16();
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                return Err(TransportError::from_status(status, body));
            }
            Ok(Err(e)) => return Err(TransportError::connection(e)),
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        };

        Ok(Arc::new(WebSocketTransport::new(stream)))
    }
}

pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    fn new(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::WebSocket
    }

    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let text = message.encode()?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::connection)
    }

    async fn recv(&self) -> Result<Option<WireMessage>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::connection(e)),
            };
            let raw = match frame {
                Message::Text(text) => text.as_str().to_owned(),
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Close(reason) => {
                    debug!(?reason, "websocket closed by server");
                    return Ok(None);
                }
                other => {
                    trace!(?other, "ignoring control frame");
                    continue;
                }
            };
            match WireMessage::decode(&raw) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("dropping undecodable websocket frame: {}", e),
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            trace!("websocket close: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_maps_scheme() {
        assert_eq!(websocket_url("http://localhost:5000"), "ws://localhost:5000/realtime/ws");
        assert_eq!(websocket_url("https://api.prodsight.io/"), "wss://api.prodsight.io/realtime/ws");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WebSocketConnector::new(&format!("http://{addr}"), Duration::from_secs(2));
        let err = connector.open("token").await.err().unwrap();

        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
