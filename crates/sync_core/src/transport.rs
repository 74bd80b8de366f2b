//! Socket seam between the connection manager and the wire.
//!
//! The real implementation speaks websocket via tokio-tungstenite; tests
//! substitute an in-memory pair.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn SocketDuplex>>;
}

/// One established duplex connection. Text frames only; the connection
/// manager owns the instance for its whole lifetime.
#[async_trait]
pub trait SocketDuplex: Send {
    async fn send(&mut self, text: String) -> Result<()>;
    /// Next inbound text frame; `None` once the peer closed.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// Derives the websocket endpoint from the HTTP server url and attaches
/// the auth token as a query parameter.
pub fn socket_url(server_url: &str, auth_token: &str) -> Result<Url> {
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    let mut url = Url::parse(&ws_url).with_context(|| format!("invalid server url: {ws_url}"))?;
    url.query_pairs_mut().append_pair("token", auth_token);
    Ok(url)
}

pub struct WebSocketConnector;

#[async_trait]
impl SocketConnector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn SocketDuplex>> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        Ok(Box::new(WebSocketDuplex { stream }))
    }
}

struct WebSocketDuplex {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketDuplex for WebSocketDuplex {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("websocket send failed")
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite; other frame kinds
                // carry nothing for this protocol.
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
