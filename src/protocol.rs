//! Wire message taxonomy.
//!
//! Three message families share one JSON text-frame encoding:
//!
//! - [`ClientMessage`] — viewer → host input (keys, pointer, scroll,
//!   resize, ping).
//! - [`ServerMessage`] — host → viewer frame updates (full snapshot,
//!   line diff, cursor, selection, pong, error).
//! - [`Envelope`] — the multiplexed form: each message wrapped with the
//!   opaque stream id it belongs to, plus relay lifecycle events.
//!
//! All enums are closed sums discriminated by a `type` tag and matched
//! exhaustively. Decoding is tolerant at the connection boundary: a
//! malformed frame is logged and dropped, the channel stays open.
//!
//! ## Scroll encoding compatibility
//!
//! Older viewers encode wheel scroll as a `mouse` action with button 4
//! (up) or 5 (down); current viewers send the explicit `scroll` message
//! with a signed `lines` count. Both are accepted on input. This crate
//! only ever emits the explicit form.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::frame::{FrameSnapshot, LineDiff, Point};

/// Modifier keys attached to a key event. Absent means not held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    /// Shift key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub shift: bool,
    /// Control key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ctrl: bool,
    /// Browser Alt / Option.
    #[serde(default, skip_serializing_if = "is_false")]
    pub meta: bool,
    /// Browser Cmd / Win.
    #[serde(default, skip_serializing_if = "is_false", rename = "super")]
    pub super_: bool,
    /// Hyper key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub hyper: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde skip_serializing_if signature
fn is_false(value: &bool) -> bool {
    !*value
}

/// Pointer action carried by a `mouse` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseAction {
    /// Button press.
    Down,
    /// Button release.
    Up,
    /// Pointer motion.
    Move,
    /// Legacy wheel scroll (direction in `button`: 4 = up, 5 = down).
    Scroll,
}

/// Messages sent from a viewer to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A logical key press (`"ArrowUp"`, `"Enter"`, `"a"`, ...).
    Key {
        /// Logical key name.
        key: String,
        /// Held modifier keys.
        #[serde(default, skip_serializing_if = "Modifiers::is_empty")]
        modifiers: Modifiers,
    },

    /// A pointer event in cell coordinates.
    Mouse {
        /// What the pointer did.
        action: MouseAction,
        /// Column.
        x: u16,
        /// Row.
        y: u16,
        /// 0 = left, 1 = middle, 2 = right; 4/5 = legacy wheel up/down.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<u8>,
    },

    /// Explicit wheel scroll. Positive `lines` scrolls downward.
    ///
    /// `lines` may be fractional on the wire (senders batch sub-line
    /// wheel deltas); the host injects only whole lines.
    Scroll {
        /// Pointer column.
        x: u16,
        /// Pointer row.
        y: u16,
        /// Signed line count, possibly fractional.
        lines: f64,
    },

    /// Viewer terminal resized.
    Resize {
        /// New column count.
        cols: u16,
        /// New row count.
        rows: u16,
    },

    /// Keepalive. Answered with [`ServerMessage::Pong`], nothing else.
    Ping,
}

/// Messages sent from the host to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full redraw: the complete current snapshot.
    Full {
        /// The snapshot.
        data: FrameSnapshot,
    },

    /// Differential redraw: only the rows that changed.
    Diff {
        /// Changed rows, ascending by index.
        changes: Vec<LineDiff>,
    },

    /// Cursor moved or changed visibility. Coordinates are 1-based.
    Cursor {
        /// Column (1-based).
        x: u16,
        /// Row (1-based).
        y: u16,
        /// Whether the cursor is drawn.
        visible: bool,
    },

    /// Text selection changed.
    Selection {
        /// Where the selection started.
        anchor: Point,
        /// Where the selection currently ends.
        focus: Point,
    },

    /// Text selection cleared.
    SelectionClear,

    /// Keepalive response.
    Pong,

    /// A recoverable host-side failure (renderer tick error).
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Relay lifecycle events forwarded to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamEvent {
    /// A new id appeared in the namespace (wildcard subscribers only).
    UpstreamDiscovered,
    /// The upstream for the id is now producing frames.
    UpstreamConnected,
    /// The upstream for the id disconnected.
    UpstreamClosed,
    /// The upstream for the id failed.
    UpstreamError,
}

/// Error detail attached to an `upstream_error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamErrorInfo {
    /// Human-readable description.
    pub message: String,
    /// Error classification name.
    pub name: String,
}

/// One frame on a multiplexed channel.
///
/// `Data` carries a serialized [`ClientMessage`] or [`ServerMessage`]
/// (direction decides which) for the stream `id`. `Event` carries a
/// relay lifecycle notification for `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Lifecycle event for a stream id.
    Event {
        /// Stream id the event concerns.
        id: String,
        /// Which lifecycle transition happened.
        event: UpstreamEvent,
        /// Present only for `upstream_error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<UpstreamErrorInfo>,
    },
    /// Serialized message for a stream id.
    Data {
        /// Stream id the payload belongs to.
        id: String,
        /// Serialized wire message (JSON text).
        data: String,
    },
}

impl Modifiers {
    /// `true` if no modifier is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.shift || self.ctrl || self.meta || self.super_ || self.hyper)
    }
}

impl Envelope {
    /// Wrap a serialized payload for a stream id.
    #[must_use]
    pub fn data(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Data {
            id: id.into(),
            data: data.into(),
        }
    }

    /// Build a lifecycle event envelope.
    #[must_use]
    pub fn event(id: impl Into<String>, event: UpstreamEvent) -> Self {
        Self::Event {
            id: id.into(),
            event,
            error: None,
        }
    }

    /// Build an `upstream_error` envelope with detail.
    #[must_use]
    pub fn upstream_error(id: impl Into<String>, message: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Event {
            id: id.into(),
            event: UpstreamEvent::UpstreamError,
            error: Some(UpstreamErrorInfo {
                message: message.into(),
                name: name.into(),
            }),
        }
    }

    /// The stream id this envelope concerns.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Event { id, .. } | Self::Data { id, .. } => id,
        }
    }
}

/// Encode any wire message as a JSON text frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).context("wire message serialization failed")
}

/// Decode a viewer → host message, or `None` if the frame is malformed.
///
/// Malformed frames are logged and dropped; the channel stays open.
#[must_use]
pub fn decode_client(text: &str) -> Option<ClientMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            log::warn!("[Wire] Dropping malformed client message: {e}");
            None
        }
    }
}

/// Decode a host → viewer message, or `None` if the frame is malformed.
#[must_use]
pub fn decode_server(text: &str) -> Option<ServerMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            log::warn!("[Wire] Dropping malformed server message: {e}");
            None
        }
    }
}

/// Decode a multiplexed envelope, or `None` if the frame is malformed.
#[must_use]
pub fn decode_envelope(text: &str) -> Option<Envelope> {
    match serde_json::from_str(text) {
        Ok(env) => Some(env),
        Err(e) => {
            log::warn!("[Wire] Dropping malformed envelope: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Line;

    #[test]
    fn key_message_round_trip() {
        let msg = ClientMessage::Key {
            key: "ArrowUp".into(),
            modifiers: Modifiers {
                ctrl: true,
                ..Modifiers::default()
            },
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"type\":\"key\""));
        assert_eq!(decode_client(&json), Some(msg));
    }

    #[test]
    fn bare_key_omits_empty_modifiers() {
        let msg = ClientMessage::Key {
            key: "a".into(),
            modifiers: Modifiers::default(),
        };
        let json = encode(&msg).unwrap();
        assert!(!json.contains("modifiers"));
    }

    #[test]
    fn super_modifier_renames_on_wire() {
        let msg = ClientMessage::Key {
            key: "k".into(),
            modifiers: Modifiers {
                super_: true,
                ..Modifiers::default()
            },
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"super\":true"));
        assert_eq!(decode_client(&json), Some(msg));
    }

    #[test]
    fn legacy_mouse_scroll_decodes() {
        let json = r#"{"type":"mouse","action":"scroll","x":10,"y":5,"button":4}"#;
        let msg = decode_client(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Mouse {
                action: MouseAction::Scroll,
                x: 10,
                y: 5,
                button: Some(4),
            }
        );
    }

    #[test]
    fn explicit_scroll_accepts_fractional_lines() {
        let json = r#"{"type":"scroll","x":1,"y":1,"lines":-2.5}"#;
        let msg = decode_client(json).unwrap();
        match msg {
            ClientMessage::Scroll { lines, .. } => assert!((lines - -2.5).abs() < f64::EPSILON),
            other => panic!("expected Scroll, got {other:?}"),
        }
    }

    #[test]
    fn resize_round_trip() {
        let json = r#"{"type":"resize","cols":100,"rows":30}"#;
        assert_eq!(
            decode_client(json),
            Some(ClientMessage::Resize {
                cols: 100,
                rows: 30
            })
        );
    }

    #[test]
    fn ping_is_bare() {
        assert_eq!(encode(&ClientMessage::Ping).unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(decode_client(r#"{"type":"ping"}"#), Some(ClientMessage::Ping));
    }

    #[test]
    fn selection_clear_uses_kebab_tag() {
        let json = encode(&ServerMessage::SelectionClear).unwrap();
        assert_eq!(json, r#"{"type":"selection-clear"}"#);
        assert_eq!(decode_server(&json), Some(ServerMessage::SelectionClear));
    }

    #[test]
    fn diff_message_shape() {
        let msg = ServerMessage::Diff {
            changes: vec![LineDiff {
                index: 5,
                line: Line {
                    spans: vec![crate::frame::Span::plain("hi")],
                },
            }],
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"type\":\"diff\""));
        assert!(json.contains("\"index\":5"));
        assert!(json.contains("\"text\":\"hi\""));
        assert_eq!(decode_server(&json), Some(msg));
    }

    #[test]
    fn cursor_message_round_trip() {
        let msg = ServerMessage::Cursor {
            x: 3,
            y: 1,
            visible: true,
        };
        let json = encode(&msg).unwrap();
        assert_eq!(decode_server(&json), Some(msg));
    }

    #[test]
    fn malformed_client_message_drops() {
        assert!(decode_client("not json").is_none());
        assert!(decode_client(r#"{"type":"warp"}"#).is_none());
        assert!(decode_client(r#"{"type":"resize","cols":"wide"}"#).is_none());
    }

    #[test]
    fn envelope_data_round_trip() {
        let inner = encode(&ClientMessage::Ping).unwrap();
        let env = Envelope::data("term-a", inner.clone());
        let json = encode(&env).unwrap();

        let decoded = decode_envelope(&json).unwrap();
        assert_eq!(decoded.id(), "term-a");
        match decoded {
            Envelope::Data { data, .. } => assert_eq!(data, inner),
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn envelope_event_round_trip() {
        let env = Envelope::event("term-a", UpstreamEvent::UpstreamDiscovered);
        let json = encode(&env).unwrap();
        assert!(json.contains("\"event\":\"upstream_discovered\""));

        let decoded = decode_envelope(&json).unwrap();
        assert_eq!(
            decoded,
            Envelope::Event {
                id: "term-a".into(),
                event: UpstreamEvent::UpstreamDiscovered,
                error: None,
            }
        );
    }

    #[test]
    fn envelope_error_carries_detail() {
        let env = Envelope::upstream_error("t", "boom", "RenderError");
        let json = encode(&env).unwrap();
        let decoded = decode_envelope(&json).unwrap();
        match decoded {
            Envelope::Event {
                event: UpstreamEvent::UpstreamError,
                error: Some(info),
                ..
            } => {
                assert_eq!(info.message, "boom");
                assert_eq!(info.name, "RenderError");
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn envelope_event_wins_over_data_in_untagged_order() {
        // An inbound frame with an `event` field must never parse as Data.
        let json = r#"{"id":"x","event":"upstream_closed"}"#;
        match decode_envelope(json).unwrap() {
            Envelope::Event { event, .. } => assert_eq!(event, UpstreamEvent::UpstreamClosed),
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn full_message_serializes_snapshot_fields() {
        let msg = ServerMessage::Full {
            data: FrameSnapshot::blank(80, 24),
        };
        let json = encode(&msg).unwrap();
        assert!(json.contains("\"type\":\"full\""));
        assert!(json.contains("\"cols\":80"));
        assert!(json.contains("\"rows\":24"));
        assert!(json.contains("\"totalLines\":24"));
    }
}
