//! Styled frame data model.
//!
//! A frame is the visible state of one virtual terminal at one instant:
//! a list of lines, each an ordered run of styled spans, plus cursor
//! position and scrollback offset. These shapes are shared verbatim by
//! the wire protocol, the differ, and the renderer façade.
//!
//! Line equality is structural (same span count, pairwise-equal spans),
//! which is what makes line-granular diffing correct: a line is resent
//! iff any of its spans changed in text, color, flags, or width.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

/// Style flag bits carried in [`Span::flags`].
///
/// Combined with bitwise OR; `0` is an unstyled span.
pub mod style {
    /// Bold weight.
    pub const BOLD: u8 = 1;
    /// Italic slant.
    pub const ITALIC: u8 = 2;
    /// Underline.
    pub const UNDERLINE: u8 = 4;
    /// Strikethrough.
    pub const STRIKETHROUGH: u8 = 8;
    /// Swap foreground and background.
    pub const INVERSE: u8 = 16;
    /// Reduced intensity.
    pub const FAINT: u8 = 32;
}

/// A maximal run of cells sharing visual attributes.
///
/// `width` is the displayed width in cells and may exceed the character
/// count for wide glyphs (CJK, emoji).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Text content of the run.
    pub text: String,
    /// Foreground color as RGB hex (`"#rrggbb"`), or `None` for default.
    #[serde(default)]
    pub fg: Option<String>,
    /// Background color as RGB hex, or `None` for default.
    #[serde(default)]
    pub bg: Option<String>,
    /// Bitfield of [`style`] flags.
    #[serde(default)]
    pub flags: u8,
    /// Display width in cells (>= character count).
    pub width: u16,
}

impl Span {
    /// Create an unstyled span whose width equals its character count.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        let width = text.chars().count() as u16;
        Self {
            text,
            fg: None,
            bg: None,
            flags: 0,
            width,
        }
    }
}

/// One terminal row as an ordered sequence of spans.
///
/// The empty line (`spans: []`) renders as a blank row and is the value
/// lines are extended with when a diff indexes past the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Spans covering this row, left to right.
    pub spans: Vec<Span>,
}

impl Line {
    /// Total displayed width of the line in cells.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.spans.iter().map(|s| s.width).sum()
    }

    /// `true` if the line has no spans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// A cell-grid position. 1-based on the wire, matching cursor emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Column (1-based).
    pub x: u16,
    /// Row (1-based).
    pub y: u16,
}

/// A text selection as anchor and focus cell positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Where the selection started.
    pub anchor: Point,
    /// Where the selection currently ends.
    pub focus: Point,
}

/// Cursor state captured alongside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    /// Column (1-based).
    pub x: u16,
    /// Row (1-based).
    pub y: u16,
    /// Whether the cursor is drawn.
    pub visible: bool,
}

/// The visible state of a terminal at one instant.
///
/// Invariants: `cols > 0`, `rows > 0`, `total_lines == lines.len()`, and
/// every line's displayed width is `<= cols`. Cursor coordinates are
/// 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSnapshot {
    /// Grid width in columns.
    pub cols: u16,
    /// Grid height in rows.
    pub rows: u16,
    /// Cursor position (1-based).
    pub cursor: Point,
    /// Whether the cursor is drawn.
    pub cursor_visible: bool,
    /// Index of the first visible line (0 when no scrollback is exposed).
    pub offset: usize,
    /// Length of `lines`.
    pub total_lines: usize,
    /// The visible lines, exactly `total_lines` entries.
    pub lines: Vec<Line>,
}

impl FrameSnapshot {
    /// Build an all-blank snapshot of the given size with a home cursor.
    #[must_use]
    pub fn blank(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            cursor: Point { x: 1, y: 1 },
            cursor_visible: true,
            offset: 0,
            total_lines: rows as usize,
            lines: vec![Line::default(); rows as usize],
        }
    }

    /// Cursor position and visibility as one comparable value.
    #[must_use]
    pub fn cursor_state(&self) -> CursorState {
        CursorState {
            x: self.cursor.x,
            y: self.cursor.y,
            visible: self.cursor_visible,
        }
    }
}

/// One changed line in a differential update.
///
/// The absence of an index means that line is unchanged since the last
/// transmission. Diffs apply over the most recently transmitted full
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    /// Row index (0-based into the snapshot's `lines`).
    pub index: usize,
    /// The new value of that line.
    pub line: Line,
}
