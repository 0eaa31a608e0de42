//! Subscriber-side multiplexer.
//!
//! The viewer-side counterpart to the server multiplexer: one channel
//! in, per-id event streams out. Listeners come in two scopes —
//! *global* listeners receive every event on the channel, *per-id*
//! listeners receive only events whose envelope id matches.
//!
//! Every subscribe returns an unsubscribe handle; unsubscribing twice
//! is a no-op. When the last listener for an id unsubscribes, the id's
//! table entry is removed so memory stays bounded under wildcard
//! discovery churn.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::protocol::{
    decode_envelope, decode_server, encode, ClientMessage, Envelope, ServerMessage,
    UpstreamErrorInfo, UpstreamEvent,
};
use crate::ws;

/// Event delivered to subscriber listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberEvent {
    /// The underlying channel opened.
    MultiplexerConnected,
    /// The underlying channel closed.
    MultiplexerDisconnected,
    /// A server message arrived for a stream id.
    Data {
        /// Stream id.
        id: String,
        /// The decoded message.
        message: ServerMessage,
    },
    /// A new id appeared in the namespace.
    UpstreamDiscovered {
        /// Stream id.
        id: String,
    },
    /// The id's upstream is producing frames.
    UpstreamConnected {
        /// Stream id.
        id: String,
    },
    /// The id's upstream went away.
    UpstreamClosed {
        /// Stream id.
        id: String,
    },
    /// The id's upstream failed.
    UpstreamError {
        /// Stream id.
        id: String,
        /// Error detail if the relay provided one.
        error: Option<UpstreamErrorInfo>,
    },
}

impl SubscriberEvent {
    /// The stream id this event concerns, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::MultiplexerConnected | Self::MultiplexerDisconnected => None,
            Self::Data { id, .. }
            | Self::UpstreamDiscovered { id }
            | Self::UpstreamConnected { id }
            | Self::UpstreamClosed { id }
            | Self::UpstreamError { id, .. } => Some(id),
        }
    }
}

type Listener = mpsc::UnboundedSender<SubscriberEvent>;

#[derive(Default)]
struct ListenerTable {
    global: HashMap<u64, Listener>,
    per_id: HashMap<String, HashMap<u64, Listener>>,
    next_token: u64,
}

#[derive(Debug, Clone)]
enum ListenerScope {
    Global,
    Id(String),
}

struct Inner {
    listeners: Mutex<ListenerTable>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

/// Unsubscribe handle returned from every subscribe call.
///
/// Idempotent: calling [`Subscription::unsubscribe`] more than once is
/// a no-op.
pub struct Subscription {
    inner: Arc<Inner>,
    scope: ListenerScope,
    token: u64,
    active: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("scope", &self.scope)
            .field("token", &self.token)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl Subscription {
    /// Remove the listener. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut table = self.inner.listeners.lock().unwrap();
        match &self.scope {
            ListenerScope::Global => {
                table.global.remove(&self.token);
            }
            ListenerScope::Id(id) => {
                if let Some(listeners) = table.per_id.get_mut(id) {
                    listeners.remove(&self.token);
                    if listeners.is_empty() {
                        table.per_id.remove(id);
                    }
                }
            }
        }
    }
}

/// Demultiplexes one channel into per-id event streams.
#[derive(Clone)]
pub struct SubscriberMux {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriberMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.listeners.lock().unwrap();
        f.debug_struct("SubscriberMux")
            .field("global_listeners", &table.global.len())
            .field("id_listeners", &table.per_id.len())
            .finish()
    }
}

impl SubscriberMux {
    /// Build a multiplexer over an already-established envelope channel.
    ///
    /// The caller owns the transport: it pumps inbound text through
    /// [`SubscriberMux::handle_frame`] and drains `outbound` into the
    /// channel. [`SubscriberMux::connect`] does this wiring for
    /// WebSocket transports.
    #[must_use]
    pub fn over_channel(outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(ListenerTable::default()),
                outbound,
            }),
        }
    }

    /// Open a WebSocket channel and return the multiplexer over it.
    ///
    /// The channel URL is `{url}?namespace={ns}` plus one `id`
    /// parameter per subscribed id (none for wildcard).
    /// `multiplexer_connected` fires on the returned mux immediately;
    /// `multiplexer_disconnected` fires when the channel closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket connect fails.
    pub async fn connect(url: &str, namespace: &str, ids: &[String]) -> Result<Self> {
        let mut channel_url = format!(
            "{}?namespace={namespace}",
            ws::http_to_ws_scheme(url).trim_end_matches('/')
        );
        for id in ids {
            channel_url.push_str("&id=");
            channel_url.push_str(id);
        }

        let (mut writer, mut reader) = ws::connect(&channel_url, &[])
            .await
            .with_context(|| format!("subscriber connect to {channel_url} failed"))?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
        let mux = Self::over_channel(outbound_tx);
        mux.dispatch(SubscriberEvent::MultiplexerConnected);

        // Writer: envelopes queued by send() go out as text frames.
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                match encode(&envelope) {
                    Ok(text) => {
                        if writer.send_text(&text).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[Subscriber] Failed to encode envelope: {e:#}"),
                }
            }
            let _ = writer.close().await;
        });

        // Reader: inbound frames dispatch to listeners until the
        // channel ends.
        let reader_mux = mux.clone();
        tokio::spawn(async move {
            while let Some(msg) = reader.recv().await {
                match msg {
                    Ok(ws::WsMessage::Text(text)) => reader_mux.handle_frame(&text),
                    Ok(ws::WsMessage::Close { code, reason }) => {
                        log::info!("[Subscriber] Channel closed ({code}): {reason}");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("[Subscriber] Channel error: {e:#}");
                        break;
                    }
                }
            }
            reader_mux.dispatch(SubscriberEvent::MultiplexerDisconnected);
        });

        Ok(mux)
    }

    /// Listen to every event on the channel.
    #[must_use]
    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<SubscriberEvent>) {
        self.add_listener(ListenerScope::Global)
    }

    /// Listen only to events for one stream id.
    #[must_use]
    pub fn subscribe_id(
        &self,
        id: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<SubscriberEvent>) {
        self.add_listener(ListenerScope::Id(id.to_string()))
    }

    fn add_listener(
        &self,
        scope: ListenerScope,
    ) -> (Subscription, mpsc::UnboundedReceiver<SubscriberEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = {
            let mut table = self.inner.listeners.lock().unwrap();
            let token = table.next_token;
            table.next_token += 1;
            match &scope {
                ListenerScope::Global => {
                    table.global.insert(token, tx);
                }
                ListenerScope::Id(id) => {
                    table.per_id.entry(id.clone()).or_default().insert(token, tx);
                }
            }
            token
        };
        (
            Subscription {
                inner: Arc::clone(&self.inner),
                scope,
                token,
                active: AtomicBool::new(true),
            },
            rx,
        )
    }

    /// Envelope a client message for a stream id and queue it outbound.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel writer has shut down.
    pub fn send(&self, id: &str, message: &ClientMessage) -> Result<()> {
        let data = encode(message)?;
        self.inner
            .outbound
            .send(Envelope::data(id, data))
            .map_err(|_| anyhow::anyhow!("subscriber channel closed"))
    }

    /// Parse one inbound text frame and dispatch the resulting event.
    ///
    /// Malformed frames are logged and dropped.
    pub fn handle_frame(&self, text: &str) {
        let Some(envelope) = decode_envelope(text) else {
            return;
        };
        self.handle_envelope(envelope);
    }

    /// Dispatch one already-parsed envelope.
    pub fn handle_envelope(&self, envelope: Envelope) {
        let event = match envelope {
            Envelope::Data { id, data } => match decode_server(&data) {
                Some(message) => SubscriberEvent::Data { id, message },
                None => return,
            },
            Envelope::Event { id, event, error } => match event {
                UpstreamEvent::UpstreamDiscovered => SubscriberEvent::UpstreamDiscovered { id },
                UpstreamEvent::UpstreamConnected => SubscriberEvent::UpstreamConnected { id },
                UpstreamEvent::UpstreamClosed => SubscriberEvent::UpstreamClosed { id },
                UpstreamEvent::UpstreamError => SubscriberEvent::UpstreamError { id, error },
            },
        };
        self.dispatch(event);
    }

    /// Deliver an event to global listeners and, when it carries an id,
    /// to that id's listeners. Dead listeners are pruned as they fail.
    pub fn dispatch(&self, event: SubscriberEvent) {
        let mut table = self.inner.listeners.lock().unwrap();

        table
            .global
            .retain(|_, listener| listener.send(event.clone()).is_ok());

        if let Some(id) = event.id().map(str::to_string) {
            let mut remove_entry = false;
            if let Some(listeners) = table.per_id.get_mut(&id) {
                listeners.retain(|_, listener| listener.send(event.clone()).is_ok());
                remove_entry = listeners.is_empty();
            }
            if remove_entry {
                table.per_id.remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn listener_counts(&self) -> (usize, usize) {
        let table = self.inner.listeners.lock().unwrap();
        (table.global.len(), table.per_id.len())
    }
}
