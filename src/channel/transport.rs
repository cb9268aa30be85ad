//! Транспорт событий: полнодуплексное соединение, адресуемое id сеанса.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::error::TransportError;

/// Поток текстовых фреймов одного цикла соединения.
/// `Err` или конец потока означают обрыв.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, showtime_id: &str) -> Result<FrameStream, TransportError>;
}

/// WebSocket-транспорт: `{base_url}/showtimes/{id}/seats`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn url_for(&self, showtime_id: &str) -> String {
        format!("{}/showtimes/{}/seats", self.base_url, showtime_id)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, showtime_id: &str) -> Result<FrameStream, TransportError> {
        let url = self.url_for(showtime_id);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(%url, "websocket handshake completed");

        // Нам нужны только текстовые фреймы; ping/pong обрабатывает tungstenite
        let frames = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            }
        });

        Ok(frames.boxed())
    }
}
