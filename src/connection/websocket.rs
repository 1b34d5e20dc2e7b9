//! WebSocket transport built on tokio-tungstenite

use super::{ConnectionError, Connector, FrameSink, FrameStream, Link};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Opens real WebSocket links
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ConnectionError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let (ws_tx, ws_rx) = ws_stream.split();

        let sink: FrameSink = Box::pin(
            ws_tx
                .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
                .with(|text: String| future::ready(Ok::<_, ConnectionError>(Message::Text(text)))),
        );

        // Only text frames carry protocol messages; pings are answered by
        // tungstenite and a close frame ends the stream.
        let stream: FrameStream = Box::pin(ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Bridge sent close frame");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
            })
        }));

        Ok(Link { sink, stream })
    }
}
