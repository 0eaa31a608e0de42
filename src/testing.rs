//! Scripted renderer doubles for unit tests.
//!
//! [`MockRenderer`] records every injected input and serves frames from
//! mutable shared state, so tests can mutate the "screen" between ticks
//! and assert on exactly what the session transmitted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use crossterm::event::{KeyCode, KeyModifiers, MouseButton};

use crate::frame::{CursorState, FrameSnapshot, Line, Point};
use crate::renderer::{Renderer, RendererFactory, SelectionEvent};

/// Recorded mouse event: (kind, x, y, button, scroll lines).
pub type MouseRecord = (String, u16, u16, Option<MouseButton>, i32);

#[derive(Debug)]
struct MockState {
    cols: u16,
    rows: u16,
    lines: Vec<Line>,
    cursor: CursorState,
    keys: Vec<(KeyCode, KeyModifiers)>,
    mouse: Vec<MouseRecord>,
    selections: VecDeque<SelectionEvent>,
    fail_next: Option<String>,
    render_count: usize,
    destroyed: bool,
}

impl MockState {
    fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            lines: vec![Line::default(); rows as usize],
            cursor: CursorState {
                x: 1,
                y: 1,
                visible: true,
            },
            keys: Vec::new(),
            mouse: Vec::new(),
            selections: VecDeque::new(),
            fail_next: None,
            render_count: 0,
            destroyed: false,
        }
    }
}

/// Test-side handle into a [`MockRenderer`]'s shared state.
#[derive(Debug, Clone)]
pub struct MockRendererHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockRendererHandle {
    /// Replace one screen line, padding with empty lines if needed.
    pub fn set_line(&self, index: usize, line: Line) {
        let mut state = self.state.lock().unwrap();
        if index >= state.lines.len() {
            state.lines.resize(index + 1, Line::default());
        }
        state.lines[index] = line;
    }

    /// Move the scripted cursor.
    pub fn set_cursor(&self, x: u16, y: u16, visible: bool) {
        self.state.lock().unwrap().cursor = CursorState { x, y, visible };
    }

    /// Queue a selection transition for the next tick to drain.
    pub fn push_selection(&self, event: SelectionEvent) {
        self.state.lock().unwrap().selections.push_back(event);
    }

    /// Make the next `render_once` fail with this message.
    pub fn fail_next_render(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    /// Current grid size as seen by the renderer.
    pub fn dims(&self) -> (u16, u16) {
        let state = self.state.lock().unwrap();
        (state.cols, state.rows)
    }

    /// Every key injected so far.
    pub fn keys(&self) -> Vec<(KeyCode, KeyModifiers)> {
        self.state.lock().unwrap().keys.clone()
    }

    /// Every mouse event injected so far.
    pub fn mouse_events(&self) -> Vec<MouseRecord> {
        self.state.lock().unwrap().mouse.clone()
    }

    /// Number of completed `render_once` calls.
    pub fn render_count(&self) -> usize {
        self.state.lock().unwrap().render_count
    }

    /// Whether `destroy` has run.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }
}

/// A renderer whose frames are scripted by the test.
#[derive(Debug)]
pub struct MockRenderer {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render_once(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.fail_next.take() {
            bail!("{msg}");
        }
        state.render_count += 1;
        Ok(())
    }

    fn capture_spans(&self) -> FrameSnapshot {
        let state = self.state.lock().unwrap();
        FrameSnapshot {
            cols: state.cols,
            rows: state.rows,
            cursor: Point {
                x: state.cursor.x,
                y: state.cursor.y,
            },
            cursor_visible: state.cursor.visible,
            offset: 0,
            total_lines: state.lines.len(),
            lines: state.lines.clone(),
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let mut state = self.state.lock().unwrap();
        state.cols = cols;
        state.rows = rows;
        state.lines = vec![Line::default(); rows as usize];
    }

    fn press_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        self.state.lock().unwrap().keys.push((code, modifiers));
    }

    fn mouse_down(&mut self, x: u16, y: u16, button: MouseButton) {
        self.state
            .lock()
            .unwrap()
            .mouse
            .push(("down".into(), x, y, Some(button), 0));
    }

    fn mouse_up(&mut self, x: u16, y: u16, button: MouseButton) {
        self.state
            .lock()
            .unwrap()
            .mouse
            .push(("up".into(), x, y, Some(button), 0));
    }

    fn mouse_move(&mut self, x: u16, y: u16) {
        self.state
            .lock()
            .unwrap()
            .mouse
            .push(("move".into(), x, y, None, 0));
    }

    fn mouse_scroll(&mut self, x: u16, y: u16, lines: i32) {
        self.state
            .lock()
            .unwrap()
            .mouse
            .push(("scroll".into(), x, y, None, lines));
    }

    fn set_cursor_position(&mut self, x: u16, y: u16, visible: bool) {
        self.state.lock().unwrap().cursor = CursorState { x, y, visible };
    }

    fn take_selection(&mut self) -> Option<SelectionEvent> {
        self.state.lock().unwrap().selections.pop_front()
    }

    fn destroy(&mut self) {
        self.state.lock().unwrap().destroyed = true;
    }
}

/// Factory producing [`MockRenderer`]s and exposing their handles.
#[derive(Debug)]
pub struct MockFactory {
    handles: Mutex<Vec<MockRendererHandle>>,
    fail: bool,
    delay: Option<std::time::Duration>,
}

impl MockFactory {
    /// A factory whose renderers always build.
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            fail: false,
            delay: None,
        }
    }

    /// A factory whose `create` always fails.
    pub fn failing() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            fail: true,
            delay: None,
        }
    }

    /// A factory that suspends in `create`, to exercise pre-ready
    /// message buffering.
    pub fn delayed(delay: std::time::Duration) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            fail: false,
            delay: Some(delay),
        }
    }

    /// Handles for every renderer created so far, in creation order.
    pub fn handles(&self) -> Vec<MockRendererHandle> {
        self.handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl RendererFactory for MockFactory {
    async fn create(&self, cols: u16, rows: u16) -> Result<Box<dyn Renderer>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            bail!("renderer creation failed (scripted)");
        }
        let state = Arc::new(Mutex::new(MockState::new(cols, rows)));
        self.handles.lock().unwrap().push(MockRendererHandle {
            state: Arc::clone(&state),
        });
        Ok(Box::new(MockRenderer { state }))
    }
}
