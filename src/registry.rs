//! Session registry.
//!
//! Maps connection keys to live sessions. Renderer creation may
//! suspend, so a connection passes through a pending phase first:
//! messages that arrive before the session is ready are buffered in a
//! bounded per-connection FIFO (overflow drops the oldest and logs)
//! and replayed in arrival order once the driver is up.
//!
//! The registry is shared behind an [`Arc`]; the map itself is guarded
//! by a plain mutex touched only on the accept/close control path and
//! on message routing — never across an await.

// Rust guideline compliant 2026-02

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::constants::PENDING_QUEUE_CAP;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::renderer::RendererFactory;
use crate::session::{spawn_driver, ConnectionHook, Session, SessionConfig, SessionHandle};

enum Entry {
    /// Renderer creation in flight; inbound messages buffer here.
    Pending { queue: VecDeque<ClientMessage> },
    /// Driver running.
    Ready(SessionHandle),
}

/// Registry of sessions keyed by connection identity.
pub struct SessionRegistry {
    factory: Arc<dyn RendererFactory>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.entries.lock().unwrap().len())
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry over a renderer factory.
    #[must_use]
    pub fn new(factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh opaque session id.
    #[must_use]
    pub fn allocate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Open a connection: record a pending entry and start the async
    /// session create. Messages routed to `key` meanwhile are buffered
    /// and replayed in order once the session is ready.
    ///
    /// The returned receiver resolves when creation finishes; on
    /// failure nothing is recorded and the error string is forwarded.
    /// Callers that do not care may drop the receiver.
    pub fn open(
        self: &Arc<Self>,
        key: impl Into<String>,
        config: SessionConfig,
        sink: mpsc::UnboundedSender<ServerMessage>,
        hook: Option<ConnectionHook>,
    ) -> oneshot::Receiver<Result<(), String>> {
        let key = key.into();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&key) {
                log::warn!("[Registry] Duplicate open for connection {key}, ignoring");
                let _ = ready_tx.send(Err(format!("connection {key} already open")));
                return ready_rx;
            }
            entries.insert(
                key.clone(),
                Entry::Pending {
                    queue: VecDeque::new(),
                },
            );
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let session_id = config.id.clone();
            let result =
                Session::create(config, registry.factory.as_ref(), sink, hook).await;
            registry.finish_open(&key, result, ready_tx);
            log::debug!("[Registry] Connection {key} -> session {session_id} settled");
        });

        ready_rx
    }

    /// Swap a pending entry for a running driver and replay its queue,
    /// or clean up when creation failed or the connection already
    /// closed.
    fn finish_open(
        &self,
        key: &str,
        result: anyhow::Result<Session>,
        ready_tx: oneshot::Sender<Result<(), String>>,
    ) {
        let mut stale_session = None;
        {
            let mut entries = self.entries.lock().unwrap();
            match result {
                Ok(session) => match entries.remove(key) {
                    Some(Entry::Pending { queue }) => {
                        let handle = spawn_driver(session);
                        for msg in queue {
                            handle.send_message(msg);
                        }
                        entries.insert(key.to_string(), Entry::Ready(handle));
                        let _ = ready_tx.send(Ok(()));
                    }
                    other => {
                        // Connection closed while the create was in
                        // flight; the session was never recorded.
                        if let Some(entry) = other {
                            entries.insert(key.to_string(), entry);
                        }
                        stale_session = Some(session);
                        let _ = ready_tx.send(Err("connection closed during create".into()));
                    }
                },
                Err(e) => {
                    entries.remove(key);
                    log::warn!("[Registry] Session create for {key} failed: {e:#}");
                    let _ = ready_tx.send(Err(format!("{e:#}")));
                }
            }
        }
        if let Some(mut session) = stale_session {
            session.destroy();
        }
    }

    /// Route one inbound message to the connection's session, buffering
    /// while the session is still pending.
    pub fn handle_message(&self, key: &str, msg: ClientMessage) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(Entry::Pending { queue }) => {
                if queue.len() >= PENDING_QUEUE_CAP {
                    queue.pop_front();
                    log::warn!(
                        "[Registry] Pre-ready queue full for {key}, dropping oldest message"
                    );
                }
                queue.push_back(msg);
            }
            Some(Entry::Ready(handle)) => {
                if !handle.send_message(msg) {
                    log::debug!("[Registry] Session for {key} is gone, removing");
                    entries.remove(key);
                }
            }
            None => {
                log::debug!("[Registry] Message for unknown connection {key}, dropping");
            }
        }
    }

    /// Close a connection: destroy its session (or abandon the pending
    /// create) and remove the entry.
    pub fn close(&self, key: &str) {
        let removed = self.entries.lock().unwrap().remove(key);
        match removed {
            Some(Entry::Ready(handle)) => {
                log::debug!("[Registry] Closing connection {key}");
                handle.destroy();
            }
            Some(Entry::Pending { .. }) => {
                // finish_open will find the entry gone and destroy the
                // session it just built.
                log::debug!("[Registry] Connection {key} closed while session pending");
            }
            None => {}
        }
    }

    /// Destroy every session. Used at process shutdown.
    pub fn close_all(&self) {
        let drained: Vec<(String, Entry)> =
            self.entries.lock().unwrap().drain().collect();
        for (key, entry) in drained {
            if let Entry::Ready(handle) = entry {
                log::debug!("[Registry] Closing connection {key} (shutdown)");
                handle.destroy();
            }
        }
    }

    /// Number of open connections (pending or ready).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// `true` if no connections are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Modifiers;
    use crate::testing::MockFactory;
    use crossterm::event::KeyCode;
    use std::time::Duration;

    fn key_msg(key: &str) -> ClientMessage {
        ClientMessage::Key {
            key: key.into(),
            modifiers: Modifiers::default(),
        }
    }

    #[tokio::test]
    async fn open_creates_session_and_routes_messages() {
        let factory = Arc::new(MockFactory::new());
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&factory) as _));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ready = registry.open("conn-1", SessionConfig::new("s1"), tx, None);
        ready.await.unwrap().unwrap();
        assert_eq!(registry.len(), 1);

        registry.handle_message("conn-1", key_msg("a"));

        // The driver processes the key and renders.
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(msg, ServerMessage::Full { .. }));

        let handle = factory.handles()[0].clone();
        for _ in 0..100 {
            if !handle.keys().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            handle.keys(),
            vec![(KeyCode::Char('a'), crossterm::event::KeyModifiers::NONE)]
        );
    }

    #[tokio::test]
    async fn pre_ready_messages_replay_in_order() {
        let factory = Arc::new(MockFactory::delayed(Duration::from_millis(50)));
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&factory) as _));
        let (tx, _rx) = mpsc::unbounded_channel();

        let ready = registry.open("conn-1", SessionConfig::new("s1"), tx, None);
        // These land while create is still sleeping.
        registry.handle_message("conn-1", key_msg("a"));
        registry.handle_message("conn-1", key_msg("b"));
        registry.handle_message("conn-1", key_msg("c"));

        ready.await.unwrap().unwrap();

        // Replay is async through the driver; poll for arrival.
        let handle = factory.handles()[0].clone();
        for _ in 0..100 {
            if handle.keys().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let keys: Vec<KeyCode> = handle.keys().into_iter().map(|(code, _)| code).collect();
        assert_eq!(
            keys,
            vec![
                KeyCode::Char('a'),
                KeyCode::Char('b'),
                KeyCode::Char('c')
            ]
        );
    }

    #[tokio::test]
    async fn pre_ready_overflow_drops_oldest() {
        let factory = Arc::new(MockFactory::delayed(Duration::from_millis(100)));
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&factory) as _));
        let (tx, _rx) = mpsc::unbounded_channel();

        let ready = registry.open("conn-1", SessionConfig::new("s1"), tx, None);
        for i in 0..(PENDING_QUEUE_CAP + 3) {
            registry.handle_message("conn-1", key_msg(&format!("{}", (b'a' + (i % 26) as u8) as char)));
        }
        ready.await.unwrap().unwrap();

        let handle = factory.handles()[0].clone();
        for _ in 0..100 {
            if handle.keys().len() >= PENDING_QUEUE_CAP {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let keys = handle.keys();
        assert_eq!(keys.len(), PENDING_QUEUE_CAP);
        // The first three (oldest) were dropped, so the replayed list
        // starts at the fourth message.
        assert_eq!(keys[0].0, KeyCode::Char((b'a' + 3) as char));
    }

    #[tokio::test]
    async fn create_failure_records_nothing() {
        let factory = Arc::new(MockFactory::failing());
        let registry = Arc::new(SessionRegistry::new(factory as _));
        let (tx, _rx) = mpsc::unbounded_channel();

        let ready = registry.open("conn-1", SessionConfig::new("s1"), tx, None);
        let result = ready.await.unwrap();
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_during_pending_destroys_created_session() {
        let factory = Arc::new(MockFactory::delayed(Duration::from_millis(50)));
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&factory) as _));
        let (tx, _rx) = mpsc::unbounded_channel();

        let ready = registry.open("conn-1", SessionConfig::new("s1"), tx, None);
        registry.close("conn-1");
        assert!(registry.is_empty());

        let result = ready.await.unwrap();
        assert!(result.is_err());

        // The renderer that finished creating was destroyed, not leaked.
        let handle = factory.handles()[0].clone();
        assert!(handle.is_destroyed());
    }

    #[tokio::test]
    async fn close_destroys_ready_session() {
        let factory = Arc::new(MockFactory::new());
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&factory) as _));
        let (tx, _rx) = mpsc::unbounded_channel();

        registry
            .open("conn-1", SessionConfig::new("s1"), tx, None)
            .await
            .unwrap()
            .unwrap();
        registry.close("conn-1");
        assert!(registry.is_empty());

        let handle = factory.handles()[0].clone();
        for _ in 0..100 {
            if handle.is_destroyed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.is_destroyed());
    }

    #[tokio::test]
    async fn duplicate_open_is_rejected() {
        let factory = Arc::new(MockFactory::new());
        let registry = Arc::new(SessionRegistry::new(factory as _));
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        registry
            .open("conn-1", SessionConfig::new("s1"), tx1, None)
            .await
            .unwrap()
            .unwrap();
        let second = registry
            .open("conn-1", SessionConfig::new("s2"), tx2, None)
            .await
            .unwrap();
        assert!(second.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn message_for_unknown_connection_is_dropped() {
        let factory = Arc::new(MockFactory::new());
        let registry = Arc::new(SessionRegistry::new(factory as _));
        // Must not panic.
        registry.handle_message("ghost", ClientMessage::Ping);
    }

    #[test]
    fn allocated_ids_are_unique() {
        let a = SessionRegistry::allocate_id();
        let b = SessionRegistry::allocate_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
