//! Session core.
//!
//! A session owns one virtual terminal behind the [`Renderer`] façade,
//! translates remote viewer input into renderer input, and transmits
//! frame deltas through an outbound sink. One tokio task drives each
//! session, so all renderer interaction, diffing, and sends for a
//! session happen on a single logical thread of control.
//!
//! # Render loop
//!
//! The driver ticks at `1000 / frame_rate` ms. A tick renders once,
//! captures the frame, and classifies the transmission:
//!
//! - first frame (or first after resize): `full`
//! - otherwise diff against the last transmitted lines; over half the
//!   screen changed escalates back to `full`
//! - cursor messages are emitted only when position or visibility
//!   actually changed
//!
//! Ticks are single-flight: a tick requested while one is running sets
//! a pending flag and exactly one follow-up tick runs afterwards.
//! Input injection requests an immediate tick so input-to-frame latency
//! stays under two tick periods.
//!
//! # Initialization
//!
//! Initialization is eager: the renderer is created at `create` time at
//! the validated initial size and the connection hook runs before
//! `create` returns. The first client `resize` resizes the renderer and
//! forces a full redraw.

// Rust guideline compliant 2026-02

use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::constants::{
    DEFAULT_FRAME_RATE, DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS, FULL_REDRAW_RATIO, MAX_SCROLL_LINES,
};
use crate::diff::diff;
use crate::frame::{CursorState, Line};
use crate::keymap::{parse_key_name, parse_modifiers, parse_mouse_button};
use crate::protocol::{ClientMessage, MouseAction, ServerMessage};
use crate::renderer::{Renderer, RendererFactory, SelectionEvent};

/// Lines injected per legacy wheel notch (mouse button 4/5).
const LEGACY_WHEEL_LINES: i32 = 3;

/// Parameters for creating a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stable opaque session id.
    pub id: String,
    /// Initial grid width.
    pub cols: u16,
    /// Initial grid height.
    pub rows: u16,
    /// Largest width a viewer may resize to.
    pub max_cols: u16,
    /// Largest height a viewer may resize to.
    pub max_rows: u16,
    /// Render loop frequency in frames per second.
    pub frame_rate: u32,
}

impl SessionConfig {
    /// Config with conventional terminal defaults for the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cols: 80,
            rows: 24,
            max_cols: DEFAULT_MAX_COLS,
            max_rows: DEFAULT_MAX_ROWS,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    /// Tick period derived from the frame rate.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.frame_rate.max(1)).max(1))
    }
}

/// Opaque teardown handle returned by a connection hook.
///
/// Disposed exactly once during session destroy; an error from the
/// underlying callback is logged and swallowed.
pub struct CleanupHandle(Box<dyn FnOnce() -> Result<()> + Send>);

impl CleanupHandle {
    /// Wrap a teardown callback.
    pub fn new(f: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    fn dispose(self) -> Result<()> {
        (self.0)()
    }
}

impl std::fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CleanupHandle")
    }
}

/// Hook run once after the renderer exists, before the loop starts.
///
/// The host application mounts itself into the renderer here and may
/// return a [`CleanupHandle`] to run at destroy.
pub type ConnectionHook =
    Box<dyn FnOnce(&mut dyn Renderer) -> Result<Option<CleanupHandle>> + Send>;

/// A stateful owner of one virtual terminal and its message loop.
pub struct Session {
    id: String,
    renderer: Box<dyn Renderer>,
    cols: u16,
    rows: u16,
    max_cols: u16,
    max_rows: u16,
    frame_rate: u32,
    /// Last transmitted line set. Empty means "next send must be full".
    last_lines: Vec<Line>,
    last_cursor: Option<CursorState>,
    rendering: bool,
    pending_render: bool,
    destroyed: bool,
    sink: mpsc::UnboundedSender<ServerMessage>,
    cleanup: Option<CleanupHandle>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session: validate sizes, build the renderer eagerly,
    /// and run the connection hook.
    ///
    /// # Errors
    ///
    /// Rejects initial dimensions that are zero or exceed the
    /// configured maxima; propagates renderer factory and connection
    /// hook failures. On any error nothing is recorded and the caller
    /// must not retain the session.
    pub async fn create(
        config: SessionConfig,
        factory: &dyn RendererFactory,
        sink: mpsc::UnboundedSender<ServerMessage>,
        on_connection: Option<ConnectionHook>,
    ) -> Result<Self> {
        if config.cols == 0 || config.rows == 0 {
            bail!(
                "invalid size for session {}: {}x{} (dimensions must be positive)",
                config.id,
                config.cols,
                config.rows
            );
        }
        if config.cols > config.max_cols || config.rows > config.max_rows {
            bail!(
                "invalid size for session {}: {}x{} exceeds maximum {}x{}",
                config.id,
                config.cols,
                config.rows,
                config.max_cols,
                config.max_rows
            );
        }

        let mut renderer = factory.create(config.cols, config.rows).await?;

        let cleanup = match on_connection {
            Some(hook) => hook(renderer.as_mut())?,
            None => None,
        };

        log::debug!(
            "[Session] Created {} at {}x{} ({} fps)",
            config.id,
            config.cols,
            config.rows,
            config.frame_rate
        );

        Ok(Self {
            id: config.id,
            renderer,
            cols: config.cols,
            rows: config.rows,
            max_cols: config.max_cols,
            max_rows: config.max_rows,
            frame_rate: config.frame_rate,
            last_lines: Vec::new(),
            last_cursor: None,
            rendering: false,
            pending_render: false,
            destroyed: false,
            sink,
            cleanup,
        })
    }

    /// Stable opaque session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current grid size.
    #[must_use]
    pub fn dims(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Tick period derived from the configured frame rate.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.frame_rate.max(1)).max(1))
    }

    /// Whether the session has been torn down (or its channel died).
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Apply one viewer message. Messages after destroy are silently
    /// ignored.
    pub async fn handle_message(&mut self, msg: ClientMessage) {
        if self.destroyed {
            return;
        }

        match msg {
            ClientMessage::Key { key, modifiers } => {
                let Some(code) = parse_key_name(&key) else {
                    log::debug!("[Session] {}: dropping unknown key {key:?}", self.id);
                    return;
                };
                self.renderer.press_key(code, parse_modifiers(&modifiers));
                self.request_render().await;
            }

            ClientMessage::Mouse {
                action,
                x,
                y,
                button,
            } => {
                match action {
                    MouseAction::Down => {
                        self.renderer.mouse_down(x, y, parse_mouse_button(button));
                    }
                    MouseAction::Up => {
                        self.renderer.mouse_up(x, y, parse_mouse_button(button));
                    }
                    MouseAction::Move => self.renderer.mouse_move(x, y),
                    MouseAction::Scroll => {
                        // Legacy encoding: button 4 = wheel up, 5 = down.
                        let lines = if button == Some(4) {
                            -LEGACY_WHEEL_LINES
                        } else {
                            LEGACY_WHEEL_LINES
                        };
                        self.renderer.mouse_scroll(x, y, lines);
                    }
                }
                self.request_render().await;
            }

            ClientMessage::Scroll { x, y, lines } => {
                let whole = lines.trunc() as i32;
                let clamped = whole.clamp(-MAX_SCROLL_LINES, MAX_SCROLL_LINES);
                if clamped != 0 {
                    self.renderer.mouse_scroll(x, y, clamped);
                    self.request_render().await;
                }
            }

            ClientMessage::Resize { cols, rows } => {
                let cols = cols.clamp(1, self.max_cols);
                let rows = rows.clamp(1, self.max_rows);
                self.renderer.resize(cols, rows);
                self.cols = cols;
                self.rows = rows;
                // Force a full snapshot on the next tick.
                self.last_lines.clear();
                self.last_cursor = None;
                self.request_render().await;
            }

            ClientMessage::Ping => {
                self.send(ServerMessage::Pong);
            }
        }
    }

    /// Request a render tick now.
    ///
    /// Single-flight: if a tick is already in progress the request is
    /// coalesced into exactly one follow-up tick.
    pub async fn request_render(&mut self) {
        if self.destroyed {
            return;
        }
        if self.rendering {
            self.pending_render = true;
            return;
        }

        self.rendering = true;
        loop {
            self.render_tick().await;
            if self.destroyed || !self.pending_render {
                break;
            }
            self.pending_render = false;
        }
        self.rendering = false;
    }

    /// One render-and-transmit step.
    async fn render_tick(&mut self) {
        if let Err(e) = self.renderer.render_once().await {
            // Transient render failures are reported, not fatal.
            log::warn!("[Session] {}: render failed: {e:#}", self.id);
            self.send(ServerMessage::Error {
                message: format!("{e:#}"),
            });
            return;
        }

        // A destroy may have landed while the renderer was suspended.
        if self.destroyed {
            return;
        }

        self.flush_selections();

        let frame = self.renderer.capture_spans();
        let cursor = frame.cursor_state();

        if self.last_lines.is_empty() {
            self.last_lines = frame.lines.clone();
            self.last_cursor = Some(cursor);
            self.send(ServerMessage::Full { data: frame });
            return;
        }

        let changes = diff(&self.last_lines, &frame.lines);
        if !changes.is_empty() {
            let escalate =
                changes.len() as f64 > FULL_REDRAW_RATIO * frame.lines.len() as f64;
            self.last_lines = frame.lines.clone();
            if escalate {
                self.send(ServerMessage::Full { data: frame });
            } else {
                self.send(ServerMessage::Diff { changes });
            }
        }

        if self.last_cursor != Some(cursor) {
            self.last_cursor = Some(cursor);
            self.send(ServerMessage::Cursor {
                x: cursor.x,
                y: cursor.y,
                visible: cursor.visible,
            });
        }
    }

    /// Forward any queued renderer selection transitions.
    fn flush_selections(&mut self) {
        while let Some(event) = self.renderer.take_selection() {
            match event {
                SelectionEvent::Set(sel) => self.send(ServerMessage::Selection {
                    anchor: sel.anchor,
                    focus: sel.focus,
                }),
                SelectionEvent::Cleared => self.send(ServerMessage::SelectionClear),
            }
        }
    }

    /// Write one outbound message. A failed write means the owning
    /// channel is gone, so the session tears itself down; subsequent
    /// sends become no-ops.
    fn send(&mut self, msg: ServerMessage) {
        if self.destroyed {
            return;
        }
        if self.sink.send(msg).is_err() {
            log::debug!("[Session] {}: channel closed, destroying", self.id);
            self.destroy();
        }
    }

    /// Tear the session down: release the renderer and run the cleanup
    /// handle. Idempotent; nothing is emitted after the first call.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.renderer.destroy();
        if let Some(cleanup) = self.cleanup.take() {
            if let Err(e) = cleanup.dispose() {
                log::warn!("[Session] {}: cleanup failed: {e:#}", self.id);
            }
        }
        log::debug!("[Session] {} destroyed", self.id);
    }
}

/// Command accepted by a spawned session driver.
#[derive(Debug)]
pub enum SessionCommand {
    /// Apply a viewer message.
    Message(ClientMessage),
    /// Tear down and exit the driver.
    Destroy,
}

/// Cloneable handle to a spawned session driver.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// The driven session's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a viewer message for the session.
    ///
    /// Returns `false` if the driver has already exited.
    pub fn send_message(&self, msg: ClientMessage) -> bool {
        self.tx.send(SessionCommand::Message(msg)).is_ok()
    }

    /// Ask the driver to destroy the session and exit.
    pub fn destroy(&self) {
        let _ = self.tx.send(SessionCommand::Destroy);
    }

    /// `true` once the driver has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the driver task that owns a session.
///
/// The driver multiplexes the paced tick interval with the command
/// channel; dropping every [`SessionHandle`] also ends the driver.
#[must_use]
pub fn spawn_driver(mut session: Session) -> SessionHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = session.id().to_string();
    let period = session.tick_period();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // A slow tick must not be followed by a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => session.request_render().await,
                cmd = rx.recv() => match cmd {
                    Some(SessionCommand::Message(msg)) => session.handle_message(msg).await,
                    Some(SessionCommand::Destroy) | None => break,
                },
            }
            if session.is_destroyed() {
                break;
            }
        }
        session.destroy();
    });

    SessionHandle { id, tx }
}
