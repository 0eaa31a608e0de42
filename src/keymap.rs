//! Logical key name translation.
//!
//! Viewers send browser-style logical key names (`"ArrowUp"`, `"Enter"`,
//! `"a"`); the renderer façade speaks crossterm's key vocabulary. This
//! module owns that mapping, plus wire-modifier and mouse-button
//! translation.

// Rust guideline compliant 2026-02

use crossterm::event::{KeyCode, KeyModifiers, MouseButton};

use crate::protocol::Modifiers;

/// Map a logical key name to a crossterm key code.
///
/// Names outside the table are passed through as single-character keys;
/// multi-character unknown names yield `None` and are dropped by the
/// caller.
#[must_use]
pub fn parse_key_name(key: &str) -> Option<KeyCode> {
    let code = match key {
        "ArrowUp" => KeyCode::Up,
        "ArrowDown" => KeyCode::Down,
        "ArrowLeft" => KeyCode::Left,
        "ArrowRight" => KeyCode::Right,
        "Enter" => KeyCode::Enter,
        "Backspace" => KeyCode::Backspace,
        "Tab" => KeyCode::Tab,
        "Escape" => KeyCode::Esc,
        "Delete" => KeyCode::Delete,
        "Home" => KeyCode::Home,
        "End" => KeyCode::End,
        "PageUp" => KeyCode::PageUp,
        "PageDown" => KeyCode::PageDown,
        "Insert" => KeyCode::Insert,
        " " | "Space" => KeyCode::Char(' '),
        _ => {
            if let Some(n) = key
                .strip_prefix('F')
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=12u8).contains(n))
            {
                KeyCode::F(n)
            } else {
                let mut chars = key.chars();
                let first = chars.next()?;
                if chars.next().is_some() {
                    // Multi-character name we do not know.
                    return None;
                }
                KeyCode::Char(first)
            }
        }
    };
    Some(code)
}

/// Translate wire modifier booleans to crossterm modifier flags.
#[must_use]
pub fn parse_modifiers(modifiers: &Modifiers) -> KeyModifiers {
    let mut flags = KeyModifiers::NONE;
    if modifiers.shift {
        flags |= KeyModifiers::SHIFT;
    }
    if modifiers.ctrl {
        flags |= KeyModifiers::CONTROL;
    }
    if modifiers.meta {
        flags |= KeyModifiers::ALT;
    }
    if modifiers.super_ {
        flags |= KeyModifiers::SUPER;
    }
    if modifiers.hyper {
        flags |= KeyModifiers::HYPER;
    }
    flags
}

/// Translate a wire mouse button code to a crossterm button.
///
/// Codes 4 and 5 are the legacy wheel encoding and have no button
/// equivalent; unknown codes default to left, matching how browsers
/// report an absent button.
#[must_use]
pub fn parse_mouse_button(button: Option<u8>) -> MouseButton {
    match button {
        Some(1) => MouseButton::Middle,
        Some(2) => MouseButton::Right,
        _ => MouseButton::Left,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_map_to_crossterm() {
        assert_eq!(parse_key_name("ArrowUp"), Some(KeyCode::Up));
        assert_eq!(parse_key_name("ArrowDown"), Some(KeyCode::Down));
        assert_eq!(parse_key_name("ArrowLeft"), Some(KeyCode::Left));
        assert_eq!(parse_key_name("ArrowRight"), Some(KeyCode::Right));
        assert_eq!(parse_key_name("Enter"), Some(KeyCode::Enter));
        assert_eq!(parse_key_name("Backspace"), Some(KeyCode::Backspace));
        assert_eq!(parse_key_name("Tab"), Some(KeyCode::Tab));
        assert_eq!(parse_key_name("Escape"), Some(KeyCode::Esc));
        assert_eq!(parse_key_name("Delete"), Some(KeyCode::Delete));
        assert_eq!(parse_key_name("Home"), Some(KeyCode::Home));
        assert_eq!(parse_key_name("End"), Some(KeyCode::End));
        assert_eq!(parse_key_name("PageUp"), Some(KeyCode::PageUp));
        assert_eq!(parse_key_name("PageDown"), Some(KeyCode::PageDown));
        assert_eq!(parse_key_name("Insert"), Some(KeyCode::Insert));
    }

    #[test]
    fn function_keys_map_in_range() {
        assert_eq!(parse_key_name("F1"), Some(KeyCode::F(1)));
        assert_eq!(parse_key_name("F12"), Some(KeyCode::F(12)));
        // F13 is outside the mapped range and not a single char.
        assert_eq!(parse_key_name("F13"), None);
    }

    #[test]
    fn single_characters_pass_through() {
        assert_eq!(parse_key_name("a"), Some(KeyCode::Char('a')));
        assert_eq!(parse_key_name("Z"), Some(KeyCode::Char('Z')));
        assert_eq!(parse_key_name("ä"), Some(KeyCode::Char('ä')));
        assert_eq!(parse_key_name(" "), Some(KeyCode::Char(' ')));
    }

    #[test]
    fn unknown_multi_char_names_drop() {
        assert_eq!(parse_key_name("MediaPlayPause"), None);
        assert_eq!(parse_key_name(""), None);
    }

    #[test]
    fn modifiers_translate_to_flags() {
        let wire = Modifiers {
            shift: true,
            ctrl: true,
            meta: false,
            super_: true,
            hyper: false,
        };
        let flags = parse_modifiers(&wire);
        assert!(flags.contains(KeyModifiers::SHIFT));
        assert!(flags.contains(KeyModifiers::CONTROL));
        assert!(!flags.contains(KeyModifiers::ALT));
        assert!(flags.contains(KeyModifiers::SUPER));
    }

    #[test]
    fn empty_modifiers_are_none() {
        assert_eq!(parse_modifiers(&Modifiers::default()), KeyModifiers::NONE);
    }

    #[test]
    fn mouse_buttons_map() {
        assert_eq!(parse_mouse_button(Some(0)), MouseButton::Left);
        assert_eq!(parse_mouse_button(Some(1)), MouseButton::Middle);
        assert_eq!(parse_mouse_button(Some(2)), MouseButton::Right);
        assert_eq!(parse_mouse_button(None), MouseButton::Left);
    }
}
