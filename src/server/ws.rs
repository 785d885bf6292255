//! WebSocket transport for viewer sessions

use axum::extract::ws::{Message, WebSocket};
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::session::{Transport, TransportError, ViewerMessage};

/// Outbound half of a viewer socket; every message is one JSON text frame
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

impl Transport for WsTransport {
    fn send<'a>(&'a mut self, message: &'a ViewerMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let text = message.to_json()?;
            self.sink
                .send(Message::Text(text))
                .await
                .map_err(|e| TransportError::Io(e.to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.sink.send(Message::Close(None)).await;
            let _ = self.sink.close().await;
        })
    }
}

/// Resolve once the viewer closes its side; anything it sends is ignored
pub async fn closed(mut stream: SplitStream<WebSocket>) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::trace!(error = %e, "WebSocket read error");
                break;
            }
        }
    }
}
