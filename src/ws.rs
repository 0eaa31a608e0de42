//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. All WebSocket consumers in the crate (tunnel
//! client, subscriber multiplexer, direct-serve adapter) use this
//! module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! [`connect`] handles URL→request building, header insertion, and TLS
//! negotiation, returning a ([`WsWriter`], [`WsReader`]) pair ready for
//! `tokio::select!` loops. [`accept`] wraps an inbound TCP stream the
//! same way for the server polarity.
//!
//! Application close codes (4008 "tunnel not active", 4009 "upstream
//! already connected") are sent via [`WsWriter::send_close_with`] and
//! surfaced verbatim in [`WsMessage::Close`].

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Client-side stream type (TCP with optional TLS).
type ClientStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Server-side stream type (plain accepted TCP).
type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

enum Sink {
    Client(futures_util::stream::SplitSink<ClientStream, tungstenite::Message>),
    Server(futures_util::stream::SplitSink<ServerStream, tungstenite::Message>),
}

enum Stream {
    Client(futures_util::stream::SplitStream<ClientStream>),
    Server(futures_util::stream::SplitStream<ServerStream>),
}

/// Write half of a WebSocket connection.
pub struct WsWriter {
    sink: Sink,
}

impl std::fmt::Debug for WsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WsWriter")
    }
}

impl WsWriter {
    async fn send_raw(&mut self, msg: tungstenite::Message) -> Result<()> {
        match &mut self.sink {
            Sink::Client(sink) => sink.send(msg).await.context("WebSocket send failed"),
            Sink::Server(sink) => sink.send(msg).await.context("WebSocket send failed"),
        }
    }

    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_raw(tungstenite::Message::Text(text.to_string()))
            .await
    }

    /// Send a pong frame in response to a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.send_raw(tungstenite::Message::Pong(data)).await
    }

    /// Send a normal close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self) -> Result<()> {
        self.send_raw(tungstenite::Message::Close(None)).await
    }

    /// Send a close frame with an application close code and reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close_with(&mut self, code: u16, reason: &str) -> Result<()> {
        self.send_raw(tungstenite::Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        })))
        .await
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::Client(sink) => sink.close().await.context("WebSocket close failed"),
            Sink::Server(sink) => sink.close().await.context("WebSocket close failed"),
        }
    }
}

/// Read half of a WebSocket connection.
pub struct WsReader {
    stream: Stream,
}

impl std::fmt::Debug for WsReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WsReader")
    }
}

impl WsReader {
    async fn next_raw(&mut self) -> Option<Result<tungstenite::Message, tungstenite::Error>> {
        match &mut self.stream {
            Stream::Client(stream) => stream.next().await,
            Stream::Server(stream) => stream.next().await,
        }
    }

    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.next_raw().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    // Raw frames — skip
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL with optional headers.
///
/// Builds an HTTP request from `url`, inserts each `(name, value)`
/// header, then performs the WebSocket handshake. Returns split
/// (writer, reader) halves for independent use in `tokio::select!`
/// loops.
///
/// # Errors
///
/// Returns an error if the URL is invalid, header values are
/// malformed, or the WebSocket handshake fails.
pub async fn connect(url: &str, headers: &[(&str, &str)]) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    let (sink, stream) = ws_stream.split();

    Ok((
        WsWriter {
            sink: Sink::Client(sink),
        },
        WsReader {
            stream: Stream::Client(stream),
        },
    ))
}

/// Accept a WebSocket handshake on an inbound TCP stream, capturing the
/// request path (with query string) the client upgraded on.
///
/// # Errors
///
/// Returns an error if the handshake fails.
pub async fn accept(stream: tokio::net::TcpStream) -> Result<(WsWriter, WsReader, String)> {
    use std::sync::{Arc, Mutex};

    let captured_path = Arc::new(Mutex::new(String::new()));
    let path_slot = Arc::clone(&captured_path);

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        move |request: &tungstenite::handshake::server::Request,
              response: tungstenite::handshake::server::Response| {
            let mut path = request.uri().path().to_string();
            if let Some(query) = request.uri().query() {
                path.push('?');
                path.push_str(query);
            }
            *path_slot.lock().unwrap() = path;
            Ok(response)
        },
    )
    .await
    .context("WebSocket accept failed")?;

    let (sink, stream) = ws_stream.split();
    let path = captured_path.lock().unwrap().clone();

    Ok((
        WsWriter {
            sink: Sink::Server(sink),
        },
        WsReader {
            stream: Stream::Server(stream),
        },
        path,
    ))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

/// Convert a WS(S) URL to HTTP(S) scheme.
///
/// Passes `http://` and `https://` through unchanged.
#[must_use]
pub fn ws_to_http_scheme(url: &str) -> String {
    if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}
