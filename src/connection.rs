use crate::config::NodeConfig;
use crate::error::{LavalinkError, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Low-level WebSocket transport to a node
///
/// Outgoing frames go through an unbounded channel drained by a single writer
/// task, so every `send` lands on the socket as one whole message. Incoming
/// text frames are forwarded, in arrival order, to the receiver returned by
/// [`Connection::connect`].
pub(crate) struct Connection {
    ws_tx: mpsc::UnboundedSender<Message>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    /// Open the node websocket and start the reader/writer tasks
    pub async fn connect(config: &NodeConfig) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        let url = config.websocket_url();
        tracing::info!("Connecting to {}", url);

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header(&config.password)?);
        headers.insert("User-Id", header(&config.user_id.to_string())?);
        headers.insert("Num-Shards", header(&config.shard_count.to_string())?);
        headers.insert("Client-Name", header(&config.client_name)?);

        let (ws_stream, _) = connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        tracing::debug!("Received: {}", text);
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("Node websocket closed: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok((
            Self {
                ws_tx,
                reader: Some(reader),
            },
            inbound_rx,
        ))
    }

    /// Transport with no socket behind it; frames are delivered to `ws_tx`
    #[cfg(test)]
    pub fn detached(ws_tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { ws_tx, reader: None }
    }

    /// Queue one text frame for the writer task
    pub fn send(&self, text: String) -> Result<()> {
        tracing::debug!("Sending: {}", text);
        self.ws_tx
            .send(Message::Text(text))
            .map_err(|_| LavalinkError::Transport("node writer has shut down".to_string()))
    }

    /// Send a close frame and stop reading
    pub fn close(&self) {
        let _ = self.ws_tx.send(Message::Close(None));
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| LavalinkError::Config(format!("invalid header value: {}", e)))
}
