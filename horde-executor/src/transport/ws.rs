//! WebSocket transport

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use super::Transport;
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport over a WebSocket connection to the miner
pub struct WsTransport {
    url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WsTransport {
    /// Opens the connection
    ///
    /// # Arguments
    /// * `url` - Full executor interface URL, including the token
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        info!("Connecting to miner at {}", url);

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|source| TransportError::Connect {
                url: url.to_string(),
                source,
            })?;

        let (sink, stream) = ws.split();

        Ok(Self {
            url: url.to_string(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame)).await.map_err(send_error)
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Receive(e)),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Miner closed the connection: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// A send on a socket that is already shut down is a closed transport
fn send_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Send(other),
    }
}
