//! Interactive client for connect mode.
//!
//! Sends each non-empty stdin line as a text frame and prints every frame the
//! server relays.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connection::{Connection, ConnectionError, ConnectionResult, MessageSink, MessageSource};
use crate::types::Payload;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors raised in connect mode
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

/// Build the WebSocket URL for a server address like `localhost:8080`
pub fn ws_url(addr: &str) -> String {
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{}/ws", addr)
    }
}

/// [`Connection`] over a client-side tungstenite stream
pub struct TungsteniteConnection {
    stream: WsStream,
}

impl TungsteniteConnection {
    pub fn new(stream: WsStream) -> Self {
        Self { stream }
    }

    /// Dial `addr` (host:port or a full ws:// URL)
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let url = ws_url(addr);
        let (stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|source| ClientError::Connect {
                    url: url.clone(),
                    source,
                })?;
        tracing::info!("Connected to {}", url);
        Ok(Self::new(stream))
    }
}

impl Connection for TungsteniteConnection {
    type Source = TungsteniteSource;
    type Sink = TungsteniteSink;

    fn split(self) -> (TungsteniteSource, TungsteniteSink) {
        let (sink, stream) = self.stream.split();
        (TungsteniteSource { stream }, TungsteniteSink { sink })
    }
}

pub struct TungsteniteSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl MessageSource for TungsteniteSource {
    async fn read_message(&mut self) -> ConnectionResult<Payload> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Payload::from(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Payload::from(data)),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed)) => {
                    return Err(ConnectionError::Closed)
                }
                Some(Err(e)) => return Err(ConnectionError::Read(e.to_string())),
            }
        }
    }
}

pub struct TungsteniteSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl MessageSink for TungsteniteSink {
    async fn write_message(&mut self, payload: Payload) -> ConnectionResult<()> {
        let bytes = payload.into_bytes();
        let message = match Utf8Bytes::try_from(bytes.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(bytes),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(ConnectionError::Close(e.to_string())),
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Run the interactive session on stdin until interrupt or the server hangs up
pub async fn run_interactive<C: Connection>(connection: C) -> Result<(), ClientError> {
    run_session(connection, BufReader::new(tokio::io::stdin())).await
}

/// Send every non-empty line of `input` and print what the server relays.
///
/// Running out of input stops sending but keeps receiving.
pub async fn run_session<C, R>(connection: C, input: R) -> Result<(), ClientError>
where
    C: Connection,
    R: AsyncBufRead + Unpin,
{
    let (mut source, mut sink) = connection.split();
    let mut lines = input.lines();
    let mut input_open = true;

    prompt();
    let result = loop {
        tokio::select! {
            incoming = source.read_message() => match incoming {
                Ok(payload) => {
                    println!("\n[Broadcast] {}", String::from_utf8_lossy(payload.as_bytes()));
                    prompt();
                }
                Err(ConnectionError::Closed) => {
                    tracing::info!("Server closed the connection");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            },
            line = lines.next_line(), if input_open => match line {
                Ok(Some(text)) => {
                    if !text.is_empty() {
                        if let Err(e) = sink.write_message(Payload::from(text)).await {
                            break Err(e.into());
                        }
                    }
                    prompt();
                }
                Ok(None) => {
                    tracing::debug!("Input closed, still receiving");
                    input_open = false;
                }
                Err(e) => break Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break Ok(());
            }
        }
    };

    if let Err(e) = sink.close().await {
        tracing::debug!("Error closing connection: {}", e);
    }
    result
}
