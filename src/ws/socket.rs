//! [`Connection`] over an upgraded axum WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::connection::{Connection, ConnectionError, ConnectionResult, MessageSink, MessageSource};
use crate::types::Payload;

pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Connection for WsConnection {
    type Source = WsSource;
    type Sink = WsSink;

    fn split(self) -> (WsSource, WsSink) {
        let (sink, stream) = self.socket.split();
        (WsSource { stream }, WsSink { sink })
    }
}

pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageSource for WsSource {
    async fn read_message(&mut self) -> ConnectionResult<Payload> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Payload::from(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Payload::from(data)),
                // Pongs are queued by the protocol layer; nothing to relay
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Err(e)) => return Err(ConnectionError::Read(e.to_string())),
            }
        }
    }
}

pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

/// Text stays text; bytes that are not UTF-8 go out as a binary frame
pub(crate) fn to_ws_message(payload: Payload) -> Message {
    let bytes = payload.into_bytes();
    match Utf8Bytes::try_from(bytes.clone()) {
        Ok(text) => Message::Text(text),
        Err(_) => Message::Binary(bytes),
    }
}

#[async_trait]
impl MessageSink for WsSink {
    async fn write_message(&mut self, payload: Payload) -> ConnectionResult<()> {
        self.sink
            .send(to_ws_message(payload))
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| ConnectionError::Close(e.to_string()))
    }
}
