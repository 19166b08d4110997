//! Hub transport: the socket seam and its WebSocket implementation.
//!
//! `HubSocket`/`Dial` exist so the connection logic can be driven by a mock
//! in tests; `WsDialer` is the real tokio-tungstenite binding.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::{Command, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Credential rejected by the hub; not retried automatically
    #[error("hub authentication failed: {0}")]
    Auth(String),

    /// Network-level failure; retried with backoff
    #[error("hub transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed message from the hub
    #[error("hub protocol error: {0}")]
    Protocol(String),

    /// The connection has been closed
    #[error("hub connection closed")]
    Closed,
}

impl HubError {
    pub fn is_auth(&self) -> bool {
        matches!(self, HubError::Auth(_))
    }
}

/// One framed JSON connection to the hub.
#[async_trait]
pub trait HubSocket: Send + Sync {
    async fn send(&mut self, cmd: Command) -> Result<(), HubError>;
    async fn recv(&mut self) -> Result<ServerMessage, HubError>;
    async fn close(&mut self);
}

/// Establishes hub connections. The engine re-dials through this on every
/// reconnect, so a fresh socket is a fresh sequence.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self, endpoint: &str) -> Result<Box<dyn HubSocket>, HubError>;
}

/// Real dialer: upgrades the configured base URL to the hub's WebSocket API.
pub struct WsDialer;

#[async_trait]
impl Dial for WsDialer {
    async fn dial(&self, endpoint: &str) -> Result<Box<dyn HubSocket>, HubError> {
        let url = websocket_url(endpoint);
        let (stream, _response) = tokio_tungstenite::connect_async(&url).await?;
        Ok(Box::new(WsSocket { inner: stream }))
    }
}

/// Derive the WebSocket API URL from a configured base URL.
///
/// "http://ha.local:8123" becomes "ws://ha.local:8123/api/websocket"; https
/// becomes wss. URLs already pointing at the API path pass through.
pub fn websocket_url(endpoint: &str) -> String {
    let mut url = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        endpoint.to_string()
    };

    if !url.ends_with("/api/websocket") {
        while url.ends_with('/') {
            url.pop();
        }
        url.push_str("/api/websocket");
    }
    url
}

struct WsSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl HubSocket for WsSocket {
    async fn send(&mut self, cmd: Command) -> Result<(), HubError> {
        let text =
            serde_json::to_string(&cmd).map_err(|e| HubError::Protocol(e.to_string()))?;
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<ServerMessage, HubError> {
        loop {
            let msg = match self.inner.next().await {
                Some(msg) => msg?,
                None => return Err(HubError::Closed),
            };
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| HubError::Protocol(e.to_string()));
                }
                Message::Close(_) => return Err(HubError::Closed),
                // Control and binary frames are not part of the hub protocol
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                    continue;
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;

    use super::*;

    /// Scripted hub socket: the test queues server messages in, sent commands
    /// are recorded for assertions. When the script runs dry the socket
    /// reports `Closed`, which the client treats as a terminal transport
    /// error.
    pub(crate) struct MockSocket {
        incoming: mpsc::UnboundedReceiver<Result<ServerMessage, HubError>>,
        sent: Arc<Mutex<Vec<Command>>>,
    }

    #[derive(Clone)]
    pub(crate) struct MockScript {
        tx: mpsc::UnboundedSender<Result<ServerMessage, HubError>>,
        pub sent: Arc<Mutex<Vec<Command>>>,
    }

    impl MockScript {
        pub fn push(&self, msg: ServerMessage) {
            let _ = self.tx.send(Ok(msg));
        }

        pub fn push_err(&self, err: HubError) {
            let _ = self.tx.send(Err(err));
        }

        pub fn sent_commands(&self) -> Vec<Command> {
            self.sent.lock().unwrap().clone()
        }
    }

    pub(crate) fn mock_socket() -> (MockSocket, MockScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            MockSocket {
                incoming: rx,
                sent: sent.clone(),
            },
            MockScript { tx, sent },
        )
    }

    #[async_trait]
    impl HubSocket for MockSocket {
        async fn send(&mut self, cmd: Command) -> Result<(), HubError> {
            self.sent.lock().unwrap().push(cmd);
            Ok(())
        }

        async fn recv(&mut self) -> Result<ServerMessage, HubError> {
            match self.incoming.recv().await {
                Some(msg) => msg,
                None => Err(HubError::Closed),
            }
        }

        async fn close(&mut self) {}
    }

    /// Dialer handing out pre-built sockets, one per connection attempt
    pub(crate) struct MockDialer {
        sockets: Mutex<VecDeque<MockSocket>>,
    }

    impl MockDialer {
        pub fn new(sockets: Vec<MockSocket>) -> Self {
            Self {
                sockets: Mutex::new(sockets.into()),
            }
        }
    }

    #[async_trait]
    impl Dial for MockDialer {
        async fn dial(&self, _endpoint: &str) -> Result<Box<dyn HubSocket>, HubError> {
            match self.sockets.lock().unwrap().pop_front() {
                Some(socket) => Ok(Box::new(socket)),
                None => Err(HubError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_conversion() {
        assert_eq!(
            websocket_url("http://ha.local:8123"),
            "ws://ha.local:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("https://ha.example.org/"),
            "wss://ha.example.org/api/websocket"
        );
        assert_eq!(
            websocket_url("ws://ha.local:8123/api/websocket"),
            "ws://ha.local:8123/api/websocket"
        );
    }
}
