//! Built-in demo application.
//!
//! A minimal line-echo terminal used by the `serve` and `share`
//! subcommands so the binary works end-to-end without an embedding
//! host application. Typed characters append to an input line, Enter
//! commits it to history, Backspace deletes. Not part of the core;
//! real hosts implement [`Renderer`] over their own UI engine.

use anyhow::Result;
use async_trait::async_trait;
use crossterm::event::{KeyCode, KeyModifiers, MouseButton};

use crate::frame::{style, FrameSnapshot, Line, Point, Span};
use crate::renderer::{Renderer, RendererFactory, SelectionEvent};

const PROMPT: &str = "> ";

/// Echo-terminal renderer backing the demo subcommands.
#[derive(Debug)]
pub struct DemoRenderer {
    cols: u16,
    rows: u16,
    history: Vec<String>,
    input: String,
    cursor_visible: bool,
    scroll_offset: usize,
}

impl DemoRenderer {
    fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            history: vec!["termcast demo - type here, watch it in the browser".to_string()],
            input: String::new(),
            cursor_visible: true,
            scroll_offset: 0,
        }
    }

    fn clip(&self, text: &str) -> String {
        text.chars().take(self.cols as usize).collect()
    }
}

#[async_trait]
impl Renderer for DemoRenderer {
    async fn render_once(&mut self) -> Result<()> {
        // All state is updated synchronously by input; nothing to do.
        Ok(())
    }

    fn capture_spans(&self) -> FrameSnapshot {
        let rows = self.rows as usize;
        let mut lines = Vec::with_capacity(rows);

        // Header row, then as much history as fits, then the prompt.
        let banner = Span {
            flags: style::BOLD,
            ..Span::plain(self.clip("termcast"))
        };
        lines.push(Line {
            spans: vec![banner],
        });

        let body_rows = rows.saturating_sub(2);
        let visible = self
            .history
            .iter()
            .rev()
            .skip(self.scroll_offset)
            .take(body_rows)
            .rev();
        for entry in visible {
            lines.push(Line {
                spans: vec![Span::plain(self.clip(entry))],
            });
        }
        while lines.len() < rows.saturating_sub(1) {
            lines.push(Line::default());
        }

        let prompt_line = self.clip(&format!("{PROMPT}{}", self.input));
        lines.push(Line {
            spans: vec![Span::plain(prompt_line)],
        });
        lines.truncate(rows);

        let cursor_x = (PROMPT.chars().count() + self.input.chars().count() + 1)
            .min(self.cols as usize) as u16;
        FrameSnapshot {
            cols: self.cols,
            rows: self.rows,
            cursor: Point {
                x: cursor_x,
                y: self.rows,
            },
            cursor_visible: self.cursor_visible,
            offset: 0,
            total_lines: lines.len(),
            lines,
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    fn press_key(&mut self, code: KeyCode, _modifiers: KeyModifiers) {
        match code {
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Enter => {
                let committed = std::mem::take(&mut self.input);
                self.history.push(format!("{PROMPT}{committed}"));
                self.scroll_offset = 0;
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            _ => {}
        }
    }

    fn mouse_down(&mut self, _x: u16, _y: u16, _button: MouseButton) {}

    fn mouse_up(&mut self, _x: u16, _y: u16, _button: MouseButton) {}

    fn mouse_move(&mut self, _x: u16, _y: u16) {}

    fn mouse_scroll(&mut self, _x: u16, _y: u16, lines: i32) {
        if lines < 0 {
            let max = self.history.len();
            self.scroll_offset = (self.scroll_offset + lines.unsigned_abs() as usize).min(max);
        } else {
            self.scroll_offset = self.scroll_offset.saturating_sub(lines as usize);
        }
    }

    fn set_cursor_position(&mut self, _x: u16, _y: u16, visible: bool) {
        self.cursor_visible = visible;
    }

    fn take_selection(&mut self) -> Option<SelectionEvent> {
        None
    }

    fn destroy(&mut self) {}
}

/// Factory producing [`DemoRenderer`]s.
#[derive(Debug, Default)]
pub struct DemoFactory;

#[async_trait]
impl RendererFactory for DemoFactory {
    async fn create(&self, cols: u16, rows: u16) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(DemoRenderer::new(cols, rows)))
    }
}
