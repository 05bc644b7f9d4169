//! Synthetic input injection.
//!
//! The scheduler only talks to the [`InputSink`] trait. [`KeySender`] is the
//! real implementation backed by `enigo`; [`DryRunSender`] logs instead of
//! touching the OS.

use std::fmt;
use std::str::FromStr;

use enigo::{Button, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{MacroError, Result};

/// Keys that have a name rather than a printable character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Shift,
    Control,
    Alt,
    /// Function key `F1`..`F12`.
    F(u8),
}

impl NamedKey {
    fn from_name(name: &str) -> Option<Self> {
        let key = match name {
            "space" => Self::Space,
            "enter" | "return" => Self::Enter,
            "tab" => Self::Tab,
            "esc" | "escape" => Self::Escape,
            "backspace" => Self::Backspace,
            "delete" | "del" => Self::Delete,
            "up" => Self::Up,
            "down" => Self::Down,
            "left" => Self::Left,
            "right" => Self::Right,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" => Self::PageUp,
            "pagedown" => Self::PageDown,
            "shift" => Self::Shift,
            "ctrl" | "control" => Self::Control,
            "alt" => Self::Alt,
            other => {
                let n: u8 = other.strip_prefix('f')?.parse().ok()?;
                if (1..=12).contains(&n) {
                    Self::F(n)
                } else {
                    return None;
                }
            }
        };
        Some(key)
    }

    fn name(&self) -> String {
        match self {
            Self::Space => "space".into(),
            Self::Enter => "enter".into(),
            Self::Tab => "tab".into(),
            Self::Escape => "esc".into(),
            Self::Backspace => "backspace".into(),
            Self::Delete => "delete".into(),
            Self::Up => "up".into(),
            Self::Down => "down".into(),
            Self::Left => "left".into(),
            Self::Right => "right".into(),
            Self::Home => "home".into(),
            Self::End => "end".into(),
            Self::PageUp => "pageup".into(),
            Self::PageDown => "pagedown".into(),
            Self::Shift => "shift".into(),
            Self::Control => "ctrl".into(),
            Self::Alt => "alt".into(),
            Self::F(n) => format!("f{n}"),
        }
    }
}

/// A key that a macro item can press.
///
/// Parsed case-insensitively from the item's `key` field: either a single
/// printable character or a key name such as `space` or `f5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacroKey {
    Char(char),
    Named(NamedKey),
}

impl FromStr for MacroKey {
    type Err = MacroError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(MacroError::invalid_key(s, "key cannot be empty"));
        }

        let mut chars = normalized.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_control() {
                return Err(MacroError::invalid_key(s, "control characters are not keys"));
            }
            return Ok(Self::Char(c));
        }

        NamedKey::from_name(&normalized)
            .map(Self::Named)
            .ok_or_else(|| MacroError::invalid_key(s, "unknown key name"))
    }
}

impl fmt::Display for MacroKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c}"),
            Self::Named(named) => f.write_str(&named.name()),
        }
    }
}

impl MacroKey {
    fn to_enigo(self) -> Key {
        match self {
            Self::Char(c) => Key::Unicode(c),
            Self::Named(named) => match named {
                NamedKey::Space => Key::Space,
                NamedKey::Enter => Key::Return,
                NamedKey::Tab => Key::Tab,
                NamedKey::Escape => Key::Escape,
                NamedKey::Backspace => Key::Backspace,
                NamedKey::Delete => Key::Delete,
                NamedKey::Up => Key::UpArrow,
                NamedKey::Down => Key::DownArrow,
                NamedKey::Left => Key::LeftArrow,
                NamedKey::Right => Key::RightArrow,
                NamedKey::Home => Key::Home,
                NamedKey::End => Key::End,
                NamedKey::PageUp => Key::PageUp,
                NamedKey::PageDown => Key::PageDown,
                NamedKey::Shift => Key::Shift,
                NamedKey::Control => Key::Control,
                NamedKey::Alt => Key::Alt,
                NamedKey::F(n) => match n {
                    1 => Key::F1,
                    2 => Key::F2,
                    3 => Key::F3,
                    4 => Key::F4,
                    5 => Key::F5,
                    6 => Key::F6,
                    7 => Key::F7,
                    8 => Key::F8,
                    9 => Key::F9,
                    10 => Key::F10,
                    11 => Key::F11,
                    _ => Key::F12,
                },
            },
        }
    }
}

/// Destination for the events the scheduler fires.
pub trait InputSink: Send + Sync {
    /// Press and release a single key.
    fn press_key(&self, key: MacroKey) -> Result<()>;

    /// Click the left mouse button at the current cursor position.
    fn click_left(&self) -> Result<()>;
}

/// Injects real OS input events through `enigo`.
pub struct KeySender {
    enigo: Mutex<Enigo>,
}

impl KeySender {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| MacroError::input_failed("connect to the input system", e.to_string()))?;
        Ok(Self {
            enigo: Mutex::new(enigo),
        })
    }
}

impl InputSink for KeySender {
    fn press_key(&self, key: MacroKey) -> Result<()> {
        self.enigo
            .lock()
            .key(key.to_enigo(), Direction::Click)
            .map_err(|e| MacroError::input_failed(format!("press key '{key}'"), e.to_string()))?;
        debug!(%key, "key pressed");
        Ok(())
    }

    fn click_left(&self) -> Result<()> {
        self.enigo
            .lock()
            .button(Button::Left, Direction::Click)
            .map_err(|e| MacroError::input_failed("click left mouse button", e.to_string()))?;
        Ok(())
    }
}

/// Logs every action instead of injecting it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSender;

impl InputSink for DryRunSender {
    fn press_key(&self, key: MacroKey) -> Result<()> {
        info!(%key, "dry run: would press key");
        Ok(())
    }

    fn click_left(&self) -> Result<()> {
        info!("dry run: would click left mouse button");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_characters() {
        assert_eq!("2".parse::<MacroKey>().unwrap(), MacroKey::Char('2'));
        assert_eq!("A".parse::<MacroKey>().unwrap(), MacroKey::Char('a'));
        assert_eq!(" q ".parse::<MacroKey>().unwrap(), MacroKey::Char('q'));
    }

    #[test]
    fn test_parse_named_keys() {
        assert_eq!(
            "Space".parse::<MacroKey>().unwrap(),
            MacroKey::Named(NamedKey::Space)
        );
        assert_eq!(
            "return".parse::<MacroKey>().unwrap(),
            MacroKey::Named(NamedKey::Enter)
        );
        assert_eq!(
            "ESC".parse::<MacroKey>().unwrap(),
            MacroKey::Named(NamedKey::Escape)
        );
        assert_eq!(
            "f12".parse::<MacroKey>().unwrap(),
            MacroKey::Named(NamedKey::F(12))
        );
        assert_eq!(
            "control".parse::<MacroKey>().unwrap(),
            MacroKey::Named(NamedKey::Control)
        );
    }

    #[test]
    fn test_parse_invalid_keys() {
        assert!("".parse::<MacroKey>().is_err());
        assert!("   ".parse::<MacroKey>().is_err());
        assert!("f13".parse::<MacroKey>().is_err());
        assert!("f0".parse::<MacroKey>().is_err());
        assert!("invalid_key_xyz".parse::<MacroKey>().is_err());
        assert!("\t".parse::<MacroKey>().is_err());
    }

    #[test]
    fn test_display_uses_canonical_names() {
        let key: MacroKey = "Return".parse().unwrap();
        assert_eq!(key.to_string(), "enter");
        let key: MacroKey = "F5".parse().unwrap();
        assert_eq!(key.to_string(), "f5");
        let key: MacroKey = "7".parse().unwrap();
        assert_eq!(key.to_string(), "7");
    }

    #[test]
    fn test_dry_run_sender_never_fails() {
        let sender = DryRunSender;
        assert!(sender.press_key(MacroKey::Char('2')).is_ok());
        assert!(sender.click_left().is_ok());
    }
}
