//! Renderer façade.
//!
//! The session core drives a host application's virtual terminal only
//! through this boundary. The renderer engine itself (layout, styling,
//! the cell grid) lives outside the crate; anything the core needs from
//! it must be expressed here and nowhere else.
//!
//! Input uses crossterm's vocabulary (`KeyCode`, `KeyModifiers`,
//! `MouseButton`) so host applications built on crossterm plug in
//! without translation.
//!
//! Selection is pull-based: the renderer queues selection changes and
//! the session drains them each tick via [`Renderer::take_selection`].
//! `Some(selection)` means changed-or-set, `None` inside the `Some`
//! means cleared.

// Rust guideline compliant 2026-02

use anyhow::Result;
use async_trait::async_trait;
use crossterm::event::{KeyCode, KeyModifiers, MouseButton};

use crate::frame::{FrameSnapshot, Selection};

/// One queued selection transition.
///
/// `Set` carries the new anchor/focus pair; `Cleared` means the
/// selection was dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    /// Selection set or moved.
    Set(Selection),
    /// Selection dismissed.
    Cleared,
}

/// The capabilities a host virtual terminal exposes to the core.
///
/// `render_once` and nothing else may suspend. `capture_spans` must
/// return a snapshot whose cursor coordinates are 1-based.
#[async_trait]
pub trait Renderer: Send {
    /// Produce a new frame. May suspend; may fail transiently.
    async fn render_once(&mut self) -> Result<()>;

    /// Capture the current frame as styled lines plus cursor state.
    fn capture_spans(&self) -> FrameSnapshot;

    /// Change the grid size.
    fn resize(&mut self, cols: u16, rows: u16);

    /// Inject a key press.
    fn press_key(&mut self, code: KeyCode, modifiers: KeyModifiers);

    /// Inject a button press at a cell position.
    fn mouse_down(&mut self, x: u16, y: u16, button: MouseButton);

    /// Inject a button release at a cell position.
    fn mouse_up(&mut self, x: u16, y: u16, button: MouseButton);

    /// Inject pointer motion to a cell position.
    fn mouse_move(&mut self, x: u16, y: u16);

    /// Inject wheel scroll. Positive `lines` scrolls downward.
    fn mouse_scroll(&mut self, x: u16, y: u16, lines: i32);

    /// Move the cursor and set its visibility.
    fn set_cursor_position(&mut self, x: u16, y: u16, visible: bool);

    /// Drain the next queued selection transition, if any.
    fn take_selection(&mut self) -> Option<SelectionEvent>;

    /// Release the renderer's resources. Called exactly once.
    fn destroy(&mut self);
}

/// Creates renderers for new sessions.
///
/// `create` may suspend (engine startup, font loading) and may fail;
/// a failure propagates out of session creation and the session is
/// never recorded.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    /// Build a renderer at the given initial grid size.
    async fn create(&self, cols: u16, rows: u16) -> Result<Box<dyn Renderer>>;
}
