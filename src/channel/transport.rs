use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

/// Something that can open a push connection to the backend.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn EventConnection>>;
}

/// One live, bidirectional connection. Text frames only; control frames are handled inside.
#[async_trait]
pub trait EventConnection: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next text frame, or `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid event channel url '{url}'"))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(anyhow!("event channel url must be ws:// or wss://, got {other}://")),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn EventConnection>> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EventConnection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream
            .send(Message::Text(frame))
            .await
            .context("failed to send frame")
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(err) => return Some(Err(anyhow!("binary frame is not UTF-8: {err}"))),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(anyhow!(err).context("websocket read failed"))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
