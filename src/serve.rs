//! Direct-serve adapter.
//!
//! Accepts WebSocket upgrades on a TCP listener and wires each
//! connection into the multiplexer. Three endpoints:
//!
//! - `/multiplexer?namespace=<ns>&id=<id>[&cols=<n>&rows=<n>]` —
//!   viewer channel over locally hosted sessions. No `id` parameters
//!   means wildcard. `cols`/`rows` are a creation hint only; the
//!   authoritative size is clamped at create and adjusted by the
//!   viewer's first `resize`.
//! - `/_tunnel/upstream?namespace=<ns>&id=<id>` — an external upstream
//!   binds its stream here. A duplicate bind closes with 4009.
//! - `/_tunnel/multiplexer?namespace=<ns>&id=<id>` — viewer channel
//!   over tunneled streams. An explicit id with no active upstream
//!   closes with 4008.
//!
//! HTTP static file serving is out of scope; anything that is not a
//! recognized WebSocket path is closed after the handshake.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::constants::{
    CLOSE_TUNNEL_NOT_ACTIVE, CLOSE_UPSTREAM_ALREADY_CONNECTED, REASON_TUNNEL_NOT_ACTIVE,
    REASON_UPSTREAM_ALREADY_CONNECTED,
};
use crate::mux::MuxServer;
use crate::protocol::{decode_envelope, encode, ClientMessage};
use crate::ws;

/// Parsed channel-upgrade request.
#[derive(Debug, PartialEq, Eq)]
struct ChannelRequest {
    route: String,
    namespace: Option<String>,
    ids: Vec<String>,
    size_hint: Option<(u16, u16)>,
}

fn parse_request(path: &str) -> ChannelRequest {
    let (route, query) = match path.split_once('?') {
        Some((route, query)) => (route, query),
        None => (path, ""),
    };

    let mut namespace = None;
    let mut ids = Vec::new();
    let mut cols = None;
    let mut rows = None;
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "namespace" => namespace = Some(value.to_string()),
            "id" => ids.push(value.to_string()),
            "cols" => cols = value.parse::<u16>().ok(),
            "rows" => rows = value.parse::<u16>().ok(),
            _ => {}
        }
    }

    ChannelRequest {
        route: route.to_string(),
        namespace,
        ids,
        size_hint: cols.zip(rows),
    }
}

impl ChannelRequest {
    /// The namespace, defaulting to the sole id when absent.
    fn resolved_namespace(&self) -> Option<String> {
        self.namespace
            .clone()
            .or_else(|| self.ids.first().cloned())
    }
}

/// Bind a TCP listener and serve channel upgrades until the task is
/// dropped.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or accepting fails.
pub async fn serve(addr: &str, mux: Arc<MuxServer>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local = listener.local_addr().context("listener has no address")?;
    log::info!("[Serve] Listening on {local}");
    serve_on(listener, mux).await
}

/// Serve channel upgrades on an already-bound listener.
///
/// # Errors
///
/// Returns an error when accepting fails fatally.
pub async fn serve_on(listener: TcpListener, mux: Arc<MuxServer>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let mux = Arc::clone(&mux);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(mux, stream).await {
                log::debug!("[Serve] Connection from {peer} ended: {e:#}");
            }
        });
    }
}

async fn handle_connection(mux: Arc<MuxServer>, stream: tokio::net::TcpStream) -> Result<()> {
    let (writer, reader, path) = ws::accept(stream).await?;
    let request = parse_request(&path);
    log::debug!("[Serve] Channel upgrade on {path}");

    match request.route.as_str() {
        "/multiplexer" => viewer_channel(mux, writer, reader, &request, true).await,
        "/_tunnel/multiplexer" => tunnel_viewer_channel(mux, writer, reader, &request).await,
        "/_tunnel/upstream" => upstream_channel(mux, writer, reader, &request).await,
        other => {
            log::debug!("[Serve] Unknown channel path {other}, closing");
            let mut writer = writer;
            let _ = writer.send_close().await;
            Ok(())
        }
    }
}

/// Viewer channel over locally hosted sessions.
async fn viewer_channel(
    mux: Arc<MuxServer>,
    mut writer: ws::WsWriter,
    mut reader: ws::WsReader,
    request: &ChannelRequest,
    auto_create: bool,
) -> Result<()> {
    let Some(namespace) = request.resolved_namespace() else {
        log::debug!("[Serve] Viewer channel without namespace or id, closing");
        let _ = writer.send_close().await;
        return Ok(());
    };

    // Apply the size hint by pre-creating explicitly requested streams.
    if auto_create {
        if let Some(hint) = request.size_hint {
            for id in &request.ids {
                mux.ensure_local_stream_sized(&namespace, id, Some(hint));
            }
        }
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let channel = mux.attach(&namespace, &request.ids, auto_create, out_tx);

    loop {
        tokio::select! {
            envelope = out_rx.recv() => match envelope {
                Some(envelope) => match encode(&envelope) {
                    Ok(text) => {
                        if writer.send_text(&text).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[Serve] Envelope encode failed: {e:#}"),
                },
                None => break,
            },

            inbound = reader.recv() => match inbound {
                Some(Ok(ws::WsMessage::Text(text))) => {
                    if let Some(envelope) = decode_envelope(&text) {
                        mux.handle_envelope(channel, envelope);
                    }
                }
                Some(Ok(ws::WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(ws::WsMessage::Close { .. })) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("[Serve] Viewer channel error: {e:#}");
                    break;
                }
            },
        }
    }

    mux.detach(channel);
    let _ = writer.close().await;
    Ok(())
}

/// Viewer channel over tunneled streams: same routing as
/// [`viewer_channel`] but never creates sessions, and an explicit id
/// with no bound upstream is refused with 4008.
async fn tunnel_viewer_channel(
    mux: Arc<MuxServer>,
    mut writer: ws::WsWriter,
    reader: ws::WsReader,
    request: &ChannelRequest,
) -> Result<()> {
    let Some(namespace) = request.resolved_namespace() else {
        let _ = writer.send_close().await;
        return Ok(());
    };

    if !request.ids.is_empty()
        && !request
            .ids
            .iter()
            .any(|id| mux.upstream_active(&namespace, id))
    {
        log::debug!(
            "[Serve] No active upstream for {namespace}/{:?}, closing 4008",
            request.ids
        );
        let _ = writer
            .send_close_with(CLOSE_TUNNEL_NOT_ACTIVE, REASON_TUNNEL_NOT_ACTIVE)
            .await;
        return Ok(());
    }

    viewer_channel(mux, writer, reader, request, false).await
}

/// External upstream binding its stream into the multiplexer.
async fn upstream_channel(
    mux: Arc<MuxServer>,
    mut writer: ws::WsWriter,
    mut reader: ws::WsReader,
    request: &ChannelRequest,
) -> Result<()> {
    let Some(id) = request.ids.first().cloned() else {
        log::debug!("[Serve] Upstream bind without id, closing");
        let _ = writer.send_close().await;
        return Ok(());
    };
    let namespace = request.namespace.clone().unwrap_or_else(|| id.clone());

    let (up_tx, mut up_rx) = mpsc::unbounded_channel::<String>();
    if mux.bind_upstream(&namespace, &id, up_tx).is_err() {
        log::info!("[Serve] Rejecting duplicate upstream for {namespace}/{id}");
        let _ = writer
            .send_close_with(
                CLOSE_UPSTREAM_ALREADY_CONNECTED,
                REASON_UPSTREAM_ALREADY_CONNECTED,
            )
            .await;
        return Ok(());
    }

    let pong_text = encode(&crate::protocol::ServerMessage::Pong)?;
    loop {
        tokio::select! {
            // Subscriber input forwarded to the upstream.
            input = up_rx.recv() => match input {
                Some(text) => {
                    if writer.send_text(&text).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            inbound = reader.recv() => match inbound {
                Some(Ok(ws::WsMessage::Text(text))) => {
                    // Answer the upstream's keepalive; fan everything
                    // else (server frames) out to subscribers.
                    let is_ping = serde_json::from_str::<ClientMessage>(&text).ok()
                        == Some(ClientMessage::Ping);
                    if is_ping {
                        if writer.send_text(&pong_text).await.is_err() {
                            break;
                        }
                    } else {
                        mux.upstream_message(&namespace, &id, text);
                    }
                }
                Some(Ok(ws::WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(ws::WsMessage::Close { .. })) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("[Serve] Upstream channel error: {e:#}");
                    break;
                }
            },
        }
    }

    mux.unbind_upstream(&namespace, &id);
    let _ = writer.close().await;
    Ok(())
}
