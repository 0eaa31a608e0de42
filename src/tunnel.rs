//! Tunnel client.
//!
//! Inverse polarity of the direct server: instead of accepting viewer
//! channels, the host dials a shared relay and binds one session to a
//! tunnel id. The relay fans the stream out to browsers this process
//! never sees, giving an otherwise unroutable host a public URL.
//!
//! The client:
//!
//! - dials `{relay}/_tunnel/upstream?id=<id>[&namespace=<ns>]`
//! - creates a single session bound to the id
//! - writes a wire-level `ping` every 20 s and discards inbound `pong`
//! - forwards every other inbound message to the session
//! - classifies close 4009 as "already connected"
//! - derives the human-facing share URL from the relay URL
//! - tears the session down on SIGINT/SIGTERM before exiting

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{broadcast, mpsc};

use crate::constants::{CLOSE_UPSTREAM_ALREADY_CONNECTED, TUNNEL_KEEPALIVE_INTERVAL};
use crate::mux::StreamDefaults;
use crate::protocol::{encode, ClientMessage, ServerMessage};
use crate::renderer::RendererFactory;
use crate::session::{spawn_driver, ConnectionHook, Session, SessionConfig};
use crate::ws;

/// Tunnel connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelStatus {
    /// Not connected to the relay.
    Disconnected = 0,
    /// Establishing the relay connection.
    Connecting = 1,
    /// Relay connection active.
    Connected = 2,
}

impl From<u8> for TunnelStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => TunnelStatus::Connecting,
            2 => TunnelStatus::Connected,
            _ => TunnelStatus::Disconnected,
        }
    }
}

/// Why a tunnel connection ended in failure.
#[derive(Debug)]
pub enum TunnelError {
    /// The relay refused the bind: another upstream owns the id
    /// (close code 4009).
    AlreadyConnected,
    /// Transport or session failure.
    Transport(anyhow::Error),
}

impl std::fmt::Display for TunnelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyConnected => {
                f.write_str("upstream already connected for this tunnel id")
            }
            Self::Transport(e) => write!(f, "tunnel transport failed: {e:#}"),
        }
    }
}

impl std::error::Error for TunnelError {}

impl From<anyhow::Error> for TunnelError {
    fn from(e: anyhow::Error) -> Self {
        Self::Transport(e)
    }
}

/// Tunnel client parameters.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Relay base URL (`wss://...` or `https://...`).
    pub relay_url: String,
    /// Tunnel id to bind.
    pub id: String,
    /// Optional namespace; defaults to the id on the share page.
    pub namespace: Option<String>,
    /// Session sizing and pacing.
    pub defaults: StreamDefaults,
}

/// Shutdown broadcast shared by every tunnel client in the process.
///
/// The signal listener task is installed exactly once, on first use.
static SHUTDOWN: OnceLock<broadcast::Sender<()>> = OnceLock::new();

fn shutdown_signal() -> broadcast::Receiver<()> {
    let sender = SHUTDOWN.get_or_init(|| {
        let (tx, _rx) = broadcast::channel(1);
        let signal_tx = tx.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term =
                    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            log::warn!("[Tunnel] Failed to install SIGTERM handler: {e}");
                            let _ = ctrl_c.await;
                            let _ = signal_tx.send(());
                            return;
                        }
                    };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            log::info!("[Tunnel] Shutdown signal received");
            let _ = signal_tx.send(());
        });
        tx
    });
    sender.subscribe()
}

/// Connects one local session to a relay and keeps it alive.
pub struct TunnelClient {
    config: TunnelConfig,
    factory: Arc<dyn RendererFactory>,
    status: Arc<AtomicU8>,
}

impl std::fmt::Debug for TunnelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelClient")
            .field("relay_url", &self.config.relay_url)
            .field("id", &self.config.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TunnelClient {
    /// Create a tunnel client. Nothing connects until
    /// [`TunnelClient::connect`].
    #[must_use]
    pub fn new(config: TunnelConfig, factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            config,
            factory,
            status: Arc::new(AtomicU8::new(TunnelStatus::Disconnected as u8)),
        }
    }

    /// Current relay connection status.
    #[must_use]
    pub fn status(&self) -> TunnelStatus {
        TunnelStatus::from(self.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: TunnelStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    /// The WebSocket URL this client dials.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        let base = ws::http_to_ws_scheme(self.config.relay_url.trim_end_matches('/'));
        let mut url = format!("{base}/_tunnel/upstream?id={}", self.config.id);
        if let Some(ref namespace) = self.config.namespace {
            url.push_str("&namespace=");
            url.push_str(namespace);
        }
        url
    }

    /// The human-facing share page URL for this tunnel.
    ///
    /// Substitutes ws(s) → http(s) on the relay URL and appends
    /// `/s/<namespace>/<id>`, collapsing to `/s/<id>` when the
    /// namespace defaults to the id.
    #[must_use]
    pub fn share_url(&self) -> String {
        let base = ws::ws_to_http_scheme(self.config.relay_url.trim_end_matches('/'));
        match self.config.namespace.as_deref() {
            Some(namespace) if namespace != self.config.id => {
                format!("{base}/s/{namespace}/{}", self.config.id)
            }
            _ => format!("{base}/s/{}", self.config.id),
        }
    }

    /// Dial the relay, bind the session, and run the message loop
    /// until the channel closes or the process is signalled.
    ///
    /// `on_disconnect` fires on an ordinary close.
    ///
    /// # Errors
    ///
    /// [`TunnelError::AlreadyConnected`] when the relay rejects the
    /// bind with close 4009; [`TunnelError::Transport`] for connection
    /// or session failures.
    pub async fn connect(
        &self,
        hook: Option<ConnectionHook>,
        on_disconnect: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), TunnelError> {
        let url = self.upstream_url();
        self.set_status(TunnelStatus::Connecting);
        log::info!("[Tunnel] Connecting to {url}");

        let (mut writer, mut reader) = match ws::connect(&url, &[]).await {
            Ok(pair) => pair,
            Err(e) => {
                self.set_status(TunnelStatus::Disconnected);
                return Err(TunnelError::Transport(e));
            }
        };
        log::info!("[Tunnel] Connected, binding session {}", self.config.id);

        // One session, bound to the tunnel id for its whole life.
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let session = Session::create(
            self.config.defaults_config(),
            self.factory.as_ref(),
            sink_tx,
            hook,
        )
        .await
        .map_err(TunnelError::Transport)?;
        let session = spawn_driver(session);

        self.set_status(TunnelStatus::Connected);
        log::info!("[Tunnel] Session live, share at {}", self.share_url());

        let mut keepalive = tokio::time::interval(TUNNEL_KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip it so the
        // first ping goes out one period after connect.
        keepalive.tick().await;

        let mut shutdown = shutdown_signal();
        let ping_text = encode(&ClientMessage::Ping).map_err(TunnelError::Transport)?;

        let outcome = loop {
            tokio::select! {
                inbound = reader.recv() => match inbound {
                    Some(Ok(ws::WsMessage::Text(text))) => self.handle_inbound(&session, &text),
                    Some(Ok(ws::WsMessage::Ping(data))) => {
                        if let Err(e) = writer.send_pong(data).await {
                            log::warn!("[Tunnel] Failed to send pong: {e:#}");
                        }
                    }
                    Some(Ok(ws::WsMessage::Close { code, reason })) => {
                        log::info!("[Tunnel] Closed by relay ({code}): {reason}");
                        if code == CLOSE_UPSTREAM_ALREADY_CONNECTED {
                            break Err(TunnelError::AlreadyConnected);
                        }
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("[Tunnel] Channel error: {e:#}");
                        break Ok(());
                    }
                    None => {
                        log::info!("[Tunnel] Channel ended");
                        break Ok(());
                    }
                },

                frame = sink_rx.recv() => match frame {
                    Some(msg) => match encode(&msg) {
                        Ok(text) => {
                            if let Err(e) = writer.send_text(&text).await {
                                log::warn!("[Tunnel] Frame write failed: {e:#}");
                                break Ok(());
                            }
                        }
                        Err(e) => log::warn!("[Tunnel] Frame encode failed: {e:#}"),
                    },
                    // Session driver exited.
                    None => break Ok(()),
                },

                _ = keepalive.tick() => {
                    if let Err(e) = writer.send_text(&ping_text).await {
                        log::warn!("[Tunnel] Keepalive write failed: {e:#}");
                        break Ok(());
                    }
                }

                _ = shutdown.recv() => {
                    log::info!("[Tunnel] Shutting down session {}", self.config.id);
                    break Ok(());
                }
            }
        };

        session.destroy();
        let _ = writer.send_close().await;
        let _ = writer.close().await;
        self.set_status(TunnelStatus::Disconnected);

        if outcome.is_ok() {
            if let Some(callback) = on_disconnect {
                callback();
            }
        }
        outcome
    }

    /// Route one inbound text frame: discard `pong`, forward everything
    /// that parses as a client message, drop the rest.
    fn handle_inbound(&self, session: &crate::session::SessionHandle, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => {
                session.send_message(msg);
            }
            Err(e) => {
                // The relay answers our keepalive with a wire pong.
                if serde_json::from_str::<ServerMessage>(text).ok() == Some(ServerMessage::Pong) {
                    return;
                }
                log::warn!("[Tunnel] Dropping malformed relay message: {e}");
            }
        }
    }
}

impl TunnelConfig {
    fn defaults_config(&self) -> SessionConfig {
        SessionConfig {
            id: self.id.clone(),
            cols: self.defaults.cols,
            rows: self.defaults.rows,
            max_cols: self.defaults.max_cols,
            max_rows: self.defaults.max_rows,
            frame_rate: self.defaults.frame_rate,
        }
    }
}
