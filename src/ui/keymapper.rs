//! Key mapping for terminal input
//!
//! Converts key events, or symbolic names such as `ctrl+c` and `alt+f4`, to
//! the bytes a real terminal would send.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::term::TerminalModes;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

impl From<Modifiers> for KeyModifiers {
    fn from(mods: Modifiers) -> Self {
        let mut result = KeyModifiers::NONE;
        if mods.contains(Modifiers::SHIFT) {
            result |= KeyModifiers::SHIFT;
        }
        if mods.contains(Modifiers::CTRL) {
            result |= KeyModifiers::CONTROL;
        }
        if mods.contains(Modifiers::ALT) {
            result |= KeyModifiers::ALT;
        }
        result
    }
}

/// Encode a key name for the program's input.
///
/// Names are case-insensitive and may carry modifiers joined with `+`.
/// A single character that is not a known name is sent as-is; an unknown
/// longer name yields `None`.
pub fn encode_key(name: &str, modes: &TerminalModes) -> Option<Vec<u8>> {
    let event = KeyMapper::parse(name)?;
    KeyMapper::map(&event, modes)
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Parse a name like `enter`, `shift+tab` or `ctrl+alt+x` into a key event
    pub fn parse(name: &str) -> Option<KeyEvent> {
        let (mod_part, key_part) = split_key_name(name)?;

        let mut mods = Modifiers::empty();
        for part in mod_part {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" | "c" => mods |= Modifiers::CTRL,
                "alt" | "meta" | "option" | "m" => mods |= Modifiers::ALT,
                "shift" | "s" => mods |= Modifiers::SHIFT,
                _ => return None,
            }
        }

        let code = Self::key_code(key_part)?;
        Some(KeyEvent::new(code, mods.into()))
    }

    fn key_code(key: &str) -> Option<KeyCode> {
        let mut chars = key.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return Some(KeyCode::Char(ch));
        }

        let lower = key.to_ascii_lowercase();
        let code = match lower.as_str() {
            "enter" | "return" | "cr" => KeyCode::Enter,
            "tab" => KeyCode::Tab,
            "backspace" | "bs" => KeyCode::Backspace,
            "escape" | "esc" => KeyCode::Esc,
            "space" => KeyCode::Char(' '),
            "up" => KeyCode::Up,
            "down" => KeyCode::Down,
            "left" => KeyCode::Left,
            "right" => KeyCode::Right,
            "home" => KeyCode::Home,
            "end" => KeyCode::End,
            "pageup" | "page_up" | "pgup" => KeyCode::PageUp,
            "pagedown" | "page_down" | "pgdn" => KeyCode::PageDown,
            "insert" | "ins" => KeyCode::Insert,
            "delete" | "del" => KeyCode::Delete,
            _ => {
                let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
                if !(1..=12).contains(&n) {
                    return None;
                }
                KeyCode::F(n)
            }
        };
        Some(code)
    }

    /// Map a crossterm KeyEvent to bytes for the program's input
    pub fn map(event: &KeyEvent, modes: &TerminalModes) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        // Alt prefixes ESC to whatever the key sends without it
        if mods.contains(Modifiers::ALT) {
            if let KeyCode::Char(_) = event.code {
                return Some(Self::map_char_event(event, mods));
            }
            let base = KeyEvent::new(event.code, (mods - Modifiers::ALT).into());
            let mut bytes = vec![0x1B];
            bytes.extend(Self::map(&base, modes)?);
            return Some(bytes);
        }

        match event.code {
            // Character keys
            KeyCode::Char(_) => Some(Self::map_char_event(event, mods)),

            KeyCode::Enter => Some(vec![0x0D]),

            KeyCode::Backspace => Some(vec![0x7F]),

            // Tab
            KeyCode::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    Some(b"\x1b[Z".to_vec())
                } else {
                    Some(vec![0x09])
                }
            }

            KeyCode::Esc => Some(vec![0x1B]),

            // Arrow keys
            KeyCode::Up => Some(Self::arrow_key(b'A', mods, modes)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods, modes)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods, modes)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods, modes)),

            // Navigation keys
            KeyCode::Home => Some(Self::special_key(b'H', mods)),
            KeyCode::End => Some(Self::special_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    fn map_char_event(event: &KeyEvent, mods: Modifiers) -> Vec<u8> {
        match event.code {
            KeyCode::Char(ch) => Self::map_char(ch, mods),
            _ => Vec::new(),
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            if let Some(code) = Self::control_code(ch) {
                return if alt { vec![0x1B, code] } else { vec![code] };
            }
        }

        let ch = if mods.contains(Modifiers::SHIFT) {
            ch.to_ascii_uppercase()
        } else {
            ch
        };

        // Alt + key = ESC + key
        let mut bytes = Vec::with_capacity(5);
        if alt {
            bytes.push(0x1B);
        }
        bytes.extend(ch.to_string().as_bytes());
        bytes
    }

    /// Control character for Ctrl + `ch`
    fn control_code(ch: char) -> Option<u8> {
        if ch.is_ascii_alphabetic() {
            return Some((ch.to_ascii_uppercase() as u8) - b'A' + 1);
        }
        match ch {
            '@' | '`' | ' ' | '2' => Some(0x00),
            '[' | '3' => Some(0x1B),
            '\\' | '4' => Some(0x1C),
            ']' | '5' => Some(0x1D),
            '^' | '~' | '6' => Some(0x1E),
            '_' | '?' | '/' | '7' => Some(0x1F),
            _ => None,
        }
    }

    /// Arrow key sequence
    fn arrow_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
        if !mods.is_empty() {
            // With modifiers: ESC [ 1 ; <mod> <key>
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        } else if modes.application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    /// Special key (Home, End) sequence
    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        }
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[{};{}~", code, mod_code).into_bytes()
        }
    }

    /// Function key sequence
    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        // F1-F4 use SS3 finals, the rest CSI numbers with gaps
        let ss3 = match n {
            1 => Some(b'P'),
            2 => Some(b'Q'),
            3 => Some(b'R'),
            4 => Some(b'S'),
            _ => None,
        };
        if let Some(key) = ss3 {
            if mods.is_empty() {
                return Some(vec![0x1B, b'O', key]);
            }
            let mod_code = Self::modifier_code(mods);
            return Some(format!("\x1b[1;{}{}", mod_code, key as char).into_bytes());
        }

        let code = match n {
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(code, mods))
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

/// Split `ctrl+alt+x` into its modifier names and key; a trailing `+` is the key
fn split_key_name(name: &str) -> Option<(Vec<&str>, &str)> {
    if name.is_empty() {
        return None;
    }
    if name == "+" {
        return Some((Vec::new(), "+"));
    }
    let (mods, key) = match name.strip_suffix("++") {
        Some(rest) => (rest, "+"),
        None => match name.rsplit_once('+') {
            Some((rest, key)) if !key.is_empty() => (rest, key),
            Some(_) => return None,
            None => return Some((Vec::new(), name)),
        },
    };
    let mods = mods.split('+').collect::<Vec<_>>();
    if mods.iter().any(|m| m.is_empty()) {
        return None;
    }
    Some((mods, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> Option<Vec<u8>> {
        encode_key(name, &TerminalModes::default())
    }

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"a".to_vec()));

        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, &modes), Some(vec![0x03]));

        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event, &modes), Some(vec![0x1B, b'x']));
    }

    #[test]
    fn test_control_letters() {
        assert_eq!(key("ctrl+c"), Some(vec![0x03]));
        assert_eq!(key("CTRL+C"), Some(vec![0x03]));
        assert_eq!(key("ctrl+a"), Some(vec![0x01]));
        assert_eq!(key("ctrl+z"), Some(vec![0x1A]));
        assert_eq!(key("ctrl+["), Some(vec![0x1B]));
        assert_eq!(key("ctrl+space"), Some(vec![0x00]));
        assert_eq!(key("ctrl+alt+d"), Some(vec![0x1B, 0x04]));
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(key("enter"), Some(vec![0x0D]));
        assert_eq!(key("Return"), Some(vec![0x0D]));
        assert_eq!(key("tab"), Some(vec![0x09]));
        assert_eq!(key("shift+tab"), Some(b"\x1b[Z".to_vec()));
        assert_eq!(key("backspace"), Some(vec![0x7F]));
        assert_eq!(key("esc"), Some(vec![0x1B]));
        assert_eq!(key("space"), Some(b" ".to_vec()));
        assert_eq!(key("home"), Some(b"\x1b[H".to_vec()));
        assert_eq!(key("end"), Some(b"\x1b[F".to_vec()));
        assert_eq!(key("pageup"), Some(b"\x1b[5~".to_vec()));
        assert_eq!(key("pgdn"), Some(b"\x1b[6~".to_vec()));
        assert_eq!(key("insert"), Some(b"\x1b[2~".to_vec()));
        assert_eq!(key("delete"), Some(b"\x1b[3~".to_vec()));
    }

    #[test]
    fn test_arrow_keys() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[A".to_vec()));

        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[1;5A".to_vec()));

        assert_eq!(key("shift+left"), Some(b"\x1b[1;2D".to_vec()));
    }

    #[test]
    fn test_application_cursor_mode() {
        let modes = TerminalModes {
            application_cursor: true,
            ..TerminalModes::default()
        };
        assert_eq!(encode_key("up", &modes), Some(b"\x1bOA".to_vec()));
        assert_eq!(encode_key("right", &modes), Some(b"\x1bOC".to_vec()));
        // Modified arrows keep the CSI form
        assert_eq!(encode_key("ctrl+up", &modes), Some(b"\x1b[1;5A".to_vec()));
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(key("f1"), Some(b"\x1bOP".to_vec()));
        assert_eq!(key("f4"), Some(b"\x1bOS".to_vec()));
        assert_eq!(key("f5"), Some(b"\x1b[15~".to_vec()));
        assert_eq!(key("F6"), Some(b"\x1b[17~".to_vec()));
        assert_eq!(key("f10"), Some(b"\x1b[21~".to_vec()));
        assert_eq!(key("f11"), Some(b"\x1b[23~".to_vec()));
        assert_eq!(key("f12"), Some(b"\x1b[24~".to_vec()));
        assert_eq!(key("f13"), None);
        assert_eq!(key("shift+f1"), Some(b"\x1b[1;2P".to_vec()));
        assert_eq!(key("ctrl+f5"), Some(b"\x1b[15;5~".to_vec()));
    }

    #[test]
    fn test_alt_prefixes_escape() {
        assert_eq!(key("alt+f4"), Some(b"\x1b\x1bOS".to_vec()));
        assert_eq!(key("alt+up"), Some(b"\x1b\x1b[A".to_vec()));
        assert_eq!(key("alt+enter"), Some(vec![0x1B, 0x0D]));
        assert_eq!(key("meta+b"), Some(b"\x1bb".to_vec()));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(key("x"), Some(b"x".to_vec()));
        assert_eq!(key("é"), Some("é".as_bytes().to_vec()));
        assert_eq!(key("+"), Some(b"+".to_vec()));
        assert_eq!(key("ctrl++"), Some(b"+".to_vec()));
        assert_eq!(key("notakey"), None);
        assert_eq!(key("hyper+a"), None);
        assert_eq!(key("ctrl+"), None);
        assert_eq!(key(""), None);
    }
}
