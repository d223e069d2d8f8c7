use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use parley_types::events::ServerEvent;

use crate::error::Result;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Live connection to the socket channel. Decoded events are forwarded to
/// the receiver returned by [`SocketHandle::connect`]; the receiver yields
/// `None` once the server goes away.
pub struct SocketHandle {
    sink: WsSink,
    reader: JoinHandle<()>,
}

impl SocketHandle {
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let (stream, _) = connect_async(url).await?;
        let (sink, mut stream) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Undecodable socket event: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((Self { sink, reader }, rx))
    }

    pub fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Send a close frame and stop reading.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
