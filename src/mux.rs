//! Server-side multiplexer.
//!
//! One duplex channel fronts many terminal streams, each identified by
//! an opaque id inside a namespace. Subscriber channels attach with an
//! explicit id set or the wildcard (empty set); inbound envelopes are
//! routed to the stream's session, outbound session messages are
//! wrapped `{id, data}` and fanned out to every subscribed channel.
//!
//! Streams come in two kinds:
//!
//! - **Local**: the session (and its renderer) lives in this process,
//!   owned through the [`SessionRegistry`]. Created eagerly for
//!   explicit subscriptions and on first inbound envelope for wildcard
//!   subscriptions.
//! - **Remote**: an external upstream bound through
//!   [`MuxServer::bind_upstream`] (the relay leg of the tunnel
//!   polarity). The upstream's frames are enveloped per id and fanned
//!   out; subscriber input is unwrapped and forwarded to the upstream.
//!
//! Lifecycle events (`upstream_discovered`, `upstream_connected`,
//! `upstream_closed`, `upstream_error`) are emitted to matching
//! subscribers as streams appear, start producing, and go away.
//!
//! Admission: at most one upstream per (namespace, id). A duplicate
//! bind is rejected with [`AdmissionError::UpstreamAlreadyConnected`],
//! which adapters translate to close code 4009.

// Rust guideline compliant 2026-02

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::protocol::{decode_client, encode, Envelope, ServerMessage, UpstreamEvent};
use crate::registry::SessionRegistry;
use crate::session::{ConnectionHook, SessionConfig};

/// Identifies one attached subscriber channel.
pub type ChannelId = u64;

/// Rejected stream admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// An upstream is already bound and active for the id.
    UpstreamAlreadyConnected,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamAlreadyConnected => f.write_str("Upstream already connected"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Supplies per-stream connection hooks for locally created sessions.
///
/// The host application uses this to mount itself into each new
/// stream's renderer.
pub trait HookProvider: Send + Sync {
    /// Hook for the stream with the given id, or `None` for none.
    fn connection_hook(&self, id: &str) -> Option<ConnectionHook>;
}

/// Default grid parameters for sessions the multiplexer creates.
#[derive(Debug, Clone)]
pub struct StreamDefaults {
    /// Initial grid width.
    pub cols: u16,
    /// Initial grid height.
    pub rows: u16,
    /// Largest width a viewer may resize to.
    pub max_cols: u16,
    /// Largest height a viewer may resize to.
    pub max_rows: u16,
    /// Render loop frequency.
    pub frame_rate: u32,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        let template = SessionConfig::new("");
        Self {
            cols: template.cols,
            rows: template.rows,
            max_cols: template.max_cols,
            max_rows: template.max_rows,
            frame_rate: template.frame_rate,
        }
    }
}

impl StreamDefaults {
    fn session_config(&self, id: &str) -> SessionConfig {
        SessionConfig {
            id: id.to_string(),
            cols: self.cols,
            rows: self.rows,
            max_cols: self.max_cols,
            max_rows: self.max_rows,
            frame_rate: self.frame_rate,
        }
    }
}

struct ChannelEntry {
    namespace: String,
    /// Subscribed ids; empty set means wildcard.
    ids: HashSet<String>,
    /// Whether unknown ids under a wildcard subscription create local
    /// sessions on demand.
    auto_create: bool,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl ChannelEntry {
    fn covers(&self, namespace: &str, id: &str) -> bool {
        self.namespace == namespace && (self.ids.is_empty() || self.ids.contains(id))
    }
}

enum StreamKind {
    /// Session owned by this process through the registry.
    Local,
    /// External upstream leg; input is forwarded as raw text.
    Remote {
        outbound: mpsc::UnboundedSender<String>,
    },
}

struct StreamEntry {
    kind: StreamKind,
    /// `true` once the stream is producing frames.
    connected: bool,
}

#[derive(Default)]
struct MuxState {
    channels: HashMap<ChannelId, ChannelEntry>,
    streams: HashMap<(String, String), StreamEntry>,
    next_channel: ChannelId,
}

/// The multiplexer: stream table, channel table, and routing.
pub struct MuxServer {
    registry: Arc<SessionRegistry>,
    defaults: StreamDefaults,
    hooks: Option<Arc<dyn HookProvider>>,
    state: Mutex<MuxState>,
}

impl std::fmt::Debug for MuxServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("MuxServer")
            .field("channel_count", &state.channels.len())
            .field("stream_count", &state.streams.len())
            .finish()
    }
}

impl MuxServer {
    /// Create a multiplexer over a session registry.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        defaults: StreamDefaults,
        hooks: Option<Arc<dyn HookProvider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            defaults,
            hooks,
            state: Mutex::new(MuxState::default()),
        })
    }

    fn stream_key(namespace: &str, id: &str) -> String {
        format!("{namespace}/{id}")
    }

    // ── Subscriber channels ───────────────────────────────────────────────

    /// Attach a subscriber channel.
    ///
    /// `ids` empty means wildcard. With `auto_create`, explicit ids get
    /// local sessions eagerly and wildcard ids get them on first
    /// inbound envelope; without it, unknown ids produce
    /// `upstream_error` envelopes instead.
    ///
    /// The new channel immediately receives `upstream_discovered` (and
    /// `upstream_connected` where applicable) for every existing stream
    /// its subscription covers.
    pub fn attach(
        self: &Arc<Self>,
        namespace: &str,
        ids: &[String],
        auto_create: bool,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) -> ChannelId {
        let channel_id = {
            let mut state = self.state.lock().unwrap();
            let channel_id = state.next_channel;
            state.next_channel += 1;

            // Catch the new subscriber up on existing matching streams.
            for ((ns, id), stream) in &state.streams {
                if ns == namespace && (ids.is_empty() || ids.contains(id)) {
                    let _ = outbound.send(Envelope::event(
                        id.clone(),
                        UpstreamEvent::UpstreamDiscovered,
                    ));
                    if stream.connected {
                        let _ = outbound.send(Envelope::event(
                            id.clone(),
                            UpstreamEvent::UpstreamConnected,
                        ));
                    }
                }
            }

            state.channels.insert(
                channel_id,
                ChannelEntry {
                    namespace: namespace.to_string(),
                    ids: ids.iter().cloned().collect(),
                    auto_create,
                    outbound,
                },
            );
            channel_id
        };

        if auto_create {
            for id in ids {
                self.ensure_local_stream(namespace, id);
            }
        }

        log::debug!(
            "[Mux] Channel {channel_id} attached to {namespace} ({} ids)",
            if ids.is_empty() {
                "wildcard".to_string()
            } else {
                ids.len().to_string()
            }
        );
        channel_id
    }

    /// Detach a subscriber channel, destroying local streams that no
    /// longer have any subscriber.
    pub fn detach(self: &Arc<Self>, channel_id: ChannelId) {
        let mut orphaned: Vec<(String, String)> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.channels.remove(&channel_id).is_none() {
                return;
            }
            for ((ns, id), stream) in &state.streams {
                if matches!(stream.kind, StreamKind::Local) {
                    let still_watched = state
                        .channels
                        .values()
                        .any(|channel| channel.covers(ns, id));
                    if !still_watched {
                        orphaned.push((ns.clone(), id.clone()));
                    }
                }
            }
            for key in &orphaned {
                state.streams.remove(key);
            }
        }

        for (ns, id) in orphaned {
            log::debug!("[Mux] Stream {ns}/{id} orphaned, destroying");
            self.registry.close(&Self::stream_key(&ns, &id));
        }
        log::debug!("[Mux] Channel {channel_id} detached");
    }

    /// Route one inbound envelope from a subscriber channel.
    ///
    /// Envelopes whose id falls outside the channel's subscription are
    /// dropped. Unknown ids either create a session on demand
    /// (wildcard + auto-create) or come back as `upstream_error`.
    pub fn handle_envelope(self: &Arc<Self>, channel_id: ChannelId, envelope: Envelope) {
        let Envelope::Data { id, data } = envelope else {
            // Subscribers have no business sending lifecycle events.
            log::debug!("[Mux] Dropping event envelope from channel {channel_id}");
            return;
        };

        enum Route {
            Local(String),
            Remote(mpsc::UnboundedSender<String>),
            CreateThenLocal(String, String),
            Reject,
            Unknown,
        }

        let route = {
            let state = self.state.lock().unwrap();
            let Some(channel) = state.channels.get(&channel_id) else {
                return;
            };
            let in_subscription = channel.ids.is_empty() || channel.ids.contains(&id);
            if !in_subscription {
                Route::Reject
            } else {
                let namespace = channel.namespace.clone();
                match state.streams.get(&(namespace.clone(), id.clone())) {
                    Some(StreamEntry {
                        kind: StreamKind::Local,
                        ..
                    }) => Route::Local(Self::stream_key(&namespace, &id)),
                    Some(StreamEntry {
                        kind: StreamKind::Remote { outbound },
                        ..
                    }) => Route::Remote(outbound.clone()),
                    None if channel.ids.is_empty() && channel.auto_create => {
                        Route::CreateThenLocal(namespace, id.clone())
                    }
                    None => Route::Unknown,
                }
            }
        };

        match route {
            Route::Local(key) => {
                if let Some(msg) = decode_client(&data) {
                    self.registry.handle_message(&key, msg);
                }
            }
            Route::Remote(outbound) => {
                if outbound.send(data).is_err() {
                    log::debug!("[Mux] Upstream for {id} is gone, dropping input");
                }
            }
            Route::CreateThenLocal(namespace, id) => {
                self.ensure_local_stream(&namespace, &id);
                if let Some(msg) = decode_client(&data) {
                    self.registry
                        .handle_message(&Self::stream_key(&namespace, &id), msg);
                }
            }
            Route::Reject => {
                log::debug!("[Mux] Channel {channel_id}: envelope id {id} outside subscription, dropping");
            }
            Route::Unknown => {
                let target = {
                    let state = self.state.lock().unwrap();
                    state.channels.get(&channel_id).map(|c| c.outbound.clone())
                };
                if let Some(outbound) = target {
                    let _ = outbound.send(Envelope::upstream_error(
                        id,
                        "no upstream bound for id",
                        "TunnelNotActive",
                    ));
                }
            }
        }
    }

    // ── Local streams ─────────────────────────────────────────────────────

    /// Create the local session for a stream id if it does not exist.
    ///
    /// Emits `upstream_discovered` immediately and `upstream_connected`
    /// (or `upstream_error`) once the async create settles.
    pub fn ensure_local_stream(self: &Arc<Self>, namespace: &str, id: &str) {
        self.ensure_local_stream_sized(namespace, id, None);
    }

    /// [`MuxServer::ensure_local_stream`] with an initial size hint
    /// (from channel-URL query parameters). The hint only applies when
    /// this call actually creates the stream, and is clamped to the
    /// configured maxima.
    pub fn ensure_local_stream_sized(
        self: &Arc<Self>,
        namespace: &str,
        id: &str,
        size_hint: Option<(u16, u16)>,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            let key = (namespace.to_string(), id.to_string());
            if state.streams.contains_key(&key) {
                return;
            }
            state.streams.insert(
                key,
                StreamEntry {
                    kind: StreamKind::Local,
                    connected: false,
                },
            );
        }
        self.broadcast_event(namespace, id, UpstreamEvent::UpstreamDiscovered, None);

        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let hook = self
            .hooks
            .as_ref()
            .and_then(|provider| provider.connection_hook(id));
        let mut config = self.defaults.session_config(id);
        if let Some((cols, rows)) = size_hint {
            config.cols = cols.clamp(1, config.max_cols);
            config.rows = rows.clamp(1, config.max_rows);
        }
        let ready = self.registry.open(
            Self::stream_key(namespace, id),
            config,
            sink_tx,
            hook,
        );

        // Forward session output as envelopes to every subscriber.
        let mux = Arc::clone(self);
        let (ns_owned, id_owned) = (namespace.to_string(), id.to_string());
        tokio::spawn(async move {
            while let Some(msg) = sink_rx.recv().await {
                mux.broadcast_server_message(&ns_owned, &id_owned, &msg);
            }
        });

        // Report the create outcome as a lifecycle event.
        let mux = Arc::clone(self);
        let (ns_owned, id_owned) = (namespace.to_string(), id.to_string());
        tokio::spawn(async move {
            match ready.await {
                Ok(Ok(())) => {
                    mux.mark_connected(&ns_owned, &id_owned);
                    mux.broadcast_event(
                        &ns_owned,
                        &id_owned,
                        UpstreamEvent::UpstreamConnected,
                        None,
                    );
                }
                Ok(Err(message)) => {
                    log::warn!("[Mux] Stream {ns_owned}/{id_owned} failed to start: {message}");
                    mux.state
                        .lock()
                        .unwrap()
                        .streams
                        .remove(&(ns_owned.clone(), id_owned.clone()));
                    mux.broadcast_event(
                        &ns_owned,
                        &id_owned,
                        UpstreamEvent::UpstreamError,
                        Some((message, "SessionCreateError".to_string())),
                    );
                }
                Err(_) => {}
            }
        });
    }

    // ── Remote upstreams ──────────────────────────────────────────────────

    /// Bind an external upstream for a stream id.
    ///
    /// `outbound` receives raw client-message text the upstream should
    /// inject; frames the upstream produces come back through
    /// [`MuxServer::upstream_message`].
    ///
    /// # Errors
    ///
    /// [`AdmissionError::UpstreamAlreadyConnected`] when the id already
    /// has an active stream; adapters translate this to close 4009.
    pub fn bind_upstream(
        self: &Arc<Self>,
        namespace: &str,
        id: &str,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<(), AdmissionError> {
        {
            let mut state = self.state.lock().unwrap();
            let key = (namespace.to_string(), id.to_string());
            if state.streams.contains_key(&key) {
                return Err(AdmissionError::UpstreamAlreadyConnected);
            }
            state.streams.insert(
                key,
                StreamEntry {
                    kind: StreamKind::Remote { outbound },
                    connected: true,
                },
            );
        }
        log::info!("[Mux] Upstream bound for {namespace}/{id}");
        self.broadcast_event(namespace, id, UpstreamEvent::UpstreamDiscovered, None);
        self.broadcast_event(namespace, id, UpstreamEvent::UpstreamConnected, None);
        Ok(())
    }

    /// Fan one upstream frame out to every subscribed channel.
    ///
    /// The text is a serialized server message and is passed through
    /// without re-parsing.
    pub fn upstream_message(self: &Arc<Self>, namespace: &str, id: &str, text: String) {
        self.broadcast(namespace, id, Envelope::data(id, text));
    }

    /// Drop an upstream binding and notify subscribers.
    pub fn unbind_upstream(self: &Arc<Self>, namespace: &str, id: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state
                .streams
                .remove(&(namespace.to_string(), id.to_string()))
                .is_some()
        };
        if removed {
            log::info!("[Mux] Upstream for {namespace}/{id} closed");
            self.broadcast_event(namespace, id, UpstreamEvent::UpstreamClosed, None);
        }
    }

    /// Whether the id has an active upstream (local or remote).
    #[must_use]
    pub fn upstream_active(&self, namespace: &str, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(&(namespace.to_string(), id.to_string()))
            .is_some_and(|stream| stream.connected)
    }

    // ── Fan-out ───────────────────────────────────────────────────────────

    fn mark_connected(&self, namespace: &str, id: &str) {
        if let Some(stream) = self
            .state
            .lock()
            .unwrap()
            .streams
            .get_mut(&(namespace.to_string(), id.to_string()))
        {
            stream.connected = true;
        }
    }

    fn broadcast_server_message(self: &Arc<Self>, namespace: &str, id: &str, msg: &ServerMessage) {
        match encode(msg) {
            Ok(text) => self.broadcast(namespace, id, Envelope::data(id, text)),
            Err(e) => log::warn!("[Mux] Failed to encode frame for {id}: {e:#}"),
        }
    }

    fn broadcast_event(
        self: &Arc<Self>,
        namespace: &str,
        id: &str,
        event: UpstreamEvent,
        error: Option<(String, String)>,
    ) {
        let envelope = match error {
            Some((message, name)) => Envelope::upstream_error(id, message, name),
            None => Envelope::event(id, event),
        };
        self.broadcast(namespace, id, envelope);
    }

    /// Deliver an envelope to every channel covering (namespace, id),
    /// detaching channels whose receivers are gone.
    fn broadcast(self: &Arc<Self>, namespace: &str, id: &str, envelope: Envelope) {
        let targets: Vec<(ChannelId, mpsc::UnboundedSender<Envelope>)> = {
            let state = self.state.lock().unwrap();
            state
                .channels
                .iter()
                .filter(|(_, channel)| channel.covers(namespace, id))
                .map(|(channel_id, channel)| (*channel_id, channel.outbound.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (channel_id, outbound) in targets {
            if outbound.send(envelope.clone()).is_err() {
                dead.push(channel_id);
            }
        }
        for channel_id in dead {
            log::debug!("[Mux] Channel {channel_id} receiver gone, detaching");
            self.detach(channel_id);
        }
    }
}
