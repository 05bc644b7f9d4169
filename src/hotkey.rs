//! Global toggle hotkey.
//!
//! Hotkey strings are parsed into `global_hotkey`'s [`HotKey`] vocabulary.
//! Matching is done by [`ComboMatcher`], a plain state machine over the set of
//! currently held keys, so it can be driven from any event source. With the
//! `hooks` feature, [`HotkeyListener`] feeds it from a global `rdev` hook on a
//! dedicated thread and posts a message into a channel when it fires.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::DEFAULT_HOTKEY;
use crate::error::{MacroError, Result};

/// Minimum time between two triggers of the same hotkey.
pub const DEBOUNCE: Duration = Duration::from_millis(350);

const MODIFIER_GROUPS: [(Modifiers, [Code; 2]); 4] = [
    (Modifiers::CONTROL, [Code::ControlLeft, Code::ControlRight]),
    (Modifiers::ALT, [Code::AltLeft, Code::AltRight]),
    (Modifiers::SHIFT, [Code::ShiftLeft, Code::ShiftRight]),
    (Modifiers::SUPER, [Code::MetaLeft, Code::MetaRight]),
];

/// Parse a hotkey such as `Ctrl+Q` or `ctrl + shift + f8`.
///
/// The last `+`-separated part is the main key; every other part must be a
/// modifier. An empty string means [`DEFAULT_HOTKEY`].
pub fn parse_hotkey(hotkey_str: &str) -> Result<HotKey> {
    let trimmed = hotkey_str.trim();
    let binding = if trimmed.is_empty() {
        DEFAULT_HOTKEY.to_lowercase()
    } else {
        trimmed.to_lowercase()
    };

    let parts: Vec<&str> = binding
        .split('+')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let (main, mods) = parts
        .split_last()
        .ok_or_else(|| MacroError::invalid_key_combination(hotkey_str, "no key specified"))?;

    let mut modifiers = Modifiers::empty();
    for part in mods {
        modifiers |= parse_modifier(part).ok_or_else(|| {
            MacroError::invalid_key_combination(
                hotkey_str,
                format!("'{part}' is not a modifier"),
            )
        })?;
    }

    if parse_modifier(main).is_some() {
        return Err(MacroError::invalid_key_combination(
            hotkey_str,
            "the last key must not be a modifier",
        ));
    }

    let code = parse_key_code(main).ok_or_else(|| {
        MacroError::invalid_key_combination(hotkey_str, format!("unsupported key '{main}'"))
    })?;

    Ok(HotKey::new(Some(modifiers), code))
}

fn parse_modifier(part: &str) -> Option<Modifiers> {
    match part {
        "ctrl" | "control" => Some(Modifiers::CONTROL),
        "alt" => Some(Modifiers::ALT),
        "shift" => Some(Modifiers::SHIFT),
        "win" | "windows" | "meta" | "super" | "cmd" => Some(Modifiers::SUPER),
        _ => None,
    }
}

fn parse_key_code(key: &str) -> Option<Code> {
    let code = match key {
        "a" => Code::KeyA,
        "b" => Code::KeyB,
        "c" => Code::KeyC,
        "d" => Code::KeyD,
        "e" => Code::KeyE,
        "f" => Code::KeyF,
        "g" => Code::KeyG,
        "h" => Code::KeyH,
        "i" => Code::KeyI,
        "j" => Code::KeyJ,
        "k" => Code::KeyK,
        "l" => Code::KeyL,
        "m" => Code::KeyM,
        "n" => Code::KeyN,
        "o" => Code::KeyO,
        "p" => Code::KeyP,
        "q" => Code::KeyQ,
        "r" => Code::KeyR,
        "s" => Code::KeyS,
        "t" => Code::KeyT,
        "u" => Code::KeyU,
        "v" => Code::KeyV,
        "w" => Code::KeyW,
        "x" => Code::KeyX,
        "y" => Code::KeyY,
        "z" => Code::KeyZ,

        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,

        "f1" => Code::F1,
        "f2" => Code::F2,
        "f3" => Code::F3,
        "f4" => Code::F4,
        "f5" => Code::F5,
        "f6" => Code::F6,
        "f7" => Code::F7,
        "f8" => Code::F8,
        "f9" => Code::F9,
        "f10" => Code::F10,
        "f11" => Code::F11,
        "f12" => Code::F12,

        "space" => Code::Space,
        "enter" | "return" => Code::Enter,
        "tab" => Code::Tab,
        "escape" | "esc" => Code::Escape,
        "backspace" => Code::Backspace,
        "delete" => Code::Delete,
        "insert" => Code::Insert,
        "home" => Code::Home,
        "end" => Code::End,
        "pageup" => Code::PageUp,
        "pagedown" => Code::PageDown,

        "up" | "arrowup" => Code::ArrowUp,
        "down" | "arrowdown" => Code::ArrowDown,
        "left" | "arrowleft" => Code::ArrowLeft,
        "right" | "arrowright" => Code::ArrowRight,

        _ => return None,
    };
    Some(code)
}

/// Tracks held keys and decides when the configured combination fires.
#[derive(Debug)]
pub struct ComboMatcher {
    hotkey: HotKey,
    pressed: HashSet<Code>,
    debounce: Duration,
    debounce_until: Option<Instant>,
}

impl ComboMatcher {
    pub fn new(hotkey: HotKey) -> Self {
        Self::with_debounce(hotkey, DEBOUNCE)
    }

    pub fn with_debounce(hotkey: HotKey, debounce: Duration) -> Self {
        Self {
            hotkey,
            pressed: HashSet::new(),
            debounce,
            debounce_until: None,
        }
    }

    pub fn hotkey(&self) -> &HotKey {
        &self.hotkey
    }

    /// Replace the combination. Held keys are forgotten.
    pub fn rebind(&mut self, hotkey: HotKey) {
        self.hotkey = hotkey;
        self.pressed.clear();
        self.debounce_until = None;
    }

    /// Record a key press. Returns `true` when this press completes the
    /// combination outside the debounce window.
    pub fn press(&mut self, code: Code, now: Instant) -> bool {
        self.pressed.insert(code);

        if self.debounce_until.is_some_and(|until| now < until) {
            return false;
        }

        if self.is_satisfied() {
            self.debounce_until = Some(now + self.debounce);
            return true;
        }
        false
    }

    pub fn release(&mut self, code: Code) {
        self.pressed.remove(&code);
    }

    /// Every required modifier group has at least one held key, and the main
    /// key is held.
    pub fn is_satisfied(&self) -> bool {
        let mods_held = MODIFIER_GROUPS
            .iter()
            .filter(|(flag, _)| self.hotkey.mods.contains(*flag))
            .all(|(_, codes)| codes.iter().any(|code| self.pressed.contains(code)));

        mods_held && self.pressed.contains(&self.hotkey.key)
    }
}

/// Background listener for the global hotkey.
///
/// Each trigger sends a clone of `message` on the channel; the receiving side
/// decides what a toggle means. The OS hook cannot be removed on every
/// platform, so [`HotkeyListener::stop`] only mutes it.
pub struct HotkeyListener {
    matcher: Arc<Mutex<ComboMatcher>>,
    active: Arc<AtomicBool>,
}

impl HotkeyListener {
    #[cfg(feature = "hooks")]
    pub fn spawn<T>(hotkey: HotKey, tx: UnboundedSender<T>, message: T) -> Result<Self>
    where
        T: Clone + Send + 'static,
    {
        use rdev::EventType;
        use tracing::{debug, warn};

        let listener = Self::unhooked(hotkey);
        let thread_matcher = Arc::clone(&listener.matcher);
        let thread_active = Arc::clone(&listener.active);

        std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let result = rdev::listen(move |event: rdev::Event| {
                    if !thread_active.load(Ordering::Relaxed) {
                        return;
                    }
                    match event.event_type {
                        EventType::KeyPress(key) => {
                            let Some(code) = code_from_rdev(key) else {
                                return;
                            };
                            let fired = thread_matcher.lock().press(code, Instant::now());
                            if fired && tx.send(message.clone()).is_err() {
                                debug!("hotkey receiver dropped");
                            }
                        }
                        EventType::KeyRelease(key) => {
                            if let Some(code) = code_from_rdev(key) {
                                thread_matcher.lock().release(code);
                            }
                        }
                        _ => {}
                    }
                });
                if let Err(e) = result {
                    warn!(error = ?e, "global hotkey listener could not hook the keyboard");
                }
            })
            .map_err(|e| MacroError::hotkey(format!("failed to start listener thread: {e}")))?;

        Ok(listener)
    }

    #[cfg(not(feature = "hooks"))]
    pub fn spawn<T>(_hotkey: HotKey, _tx: UnboundedSender<T>, _message: T) -> Result<Self>
    where
        T: Clone + Send + 'static,
    {
        Err(MacroError::hotkey(
            "global hotkeys need the `hooks` feature",
        ))
    }

    /// Listener state without an OS hook behind it.
    #[cfg_attr(not(feature = "hooks"), allow(dead_code))]
    pub(crate) fn unhooked(hotkey: HotKey) -> Self {
        Self {
            matcher: Arc::new(Mutex::new(ComboMatcher::new(hotkey))),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Swap the combination while the hook keeps running.
    pub fn rebind(&self, hotkey: HotKey) {
        self.matcher.lock().rebind(hotkey);
    }

    pub fn hotkey(&self) -> HotKey {
        *self.matcher.lock().hotkey()
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.matcher.lock().pressed.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "hooks")]
fn code_from_rdev(key: rdev::Key) -> Option<Code> {
    use rdev::Key;

    let code = match key {
        Key::KeyA => Code::KeyA,
        Key::KeyB => Code::KeyB,
        Key::KeyC => Code::KeyC,
        Key::KeyD => Code::KeyD,
        Key::KeyE => Code::KeyE,
        Key::KeyF => Code::KeyF,
        Key::KeyG => Code::KeyG,
        Key::KeyH => Code::KeyH,
        Key::KeyI => Code::KeyI,
        Key::KeyJ => Code::KeyJ,
        Key::KeyK => Code::KeyK,
        Key::KeyL => Code::KeyL,
        Key::KeyM => Code::KeyM,
        Key::KeyN => Code::KeyN,
        Key::KeyO => Code::KeyO,
        Key::KeyP => Code::KeyP,
        Key::KeyQ => Code::KeyQ,
        Key::KeyR => Code::KeyR,
        Key::KeyS => Code::KeyS,
        Key::KeyT => Code::KeyT,
        Key::KeyU => Code::KeyU,
        Key::KeyV => Code::KeyV,
        Key::KeyW => Code::KeyW,
        Key::KeyX => Code::KeyX,
        Key::KeyY => Code::KeyY,
        Key::KeyZ => Code::KeyZ,
        Key::Num0 => Code::Digit0,
        Key::Num1 => Code::Digit1,
        Key::Num2 => Code::Digit2,
        Key::Num3 => Code::Digit3,
        Key::Num4 => Code::Digit4,
        Key::Num5 => Code::Digit5,
        Key::Num6 => Code::Digit6,
        Key::Num7 => Code::Digit7,
        Key::Num8 => Code::Digit8,
        Key::Num9 => Code::Digit9,
        Key::F1 => Code::F1,
        Key::F2 => Code::F2,
        Key::F3 => Code::F3,
        Key::F4 => Code::F4,
        Key::F5 => Code::F5,
        Key::F6 => Code::F6,
        Key::F7 => Code::F7,
        Key::F8 => Code::F8,
        Key::F9 => Code::F9,
        Key::F10 => Code::F10,
        Key::F11 => Code::F11,
        Key::F12 => Code::F12,
        Key::Space => Code::Space,
        Key::Return => Code::Enter,
        Key::Tab => Code::Tab,
        Key::Escape => Code::Escape,
        Key::Backspace => Code::Backspace,
        Key::Delete => Code::Delete,
        Key::Insert => Code::Insert,
        Key::Home => Code::Home,
        Key::End => Code::End,
        Key::PageUp => Code::PageUp,
        Key::PageDown => Code::PageDown,
        Key::UpArrow => Code::ArrowUp,
        Key::DownArrow => Code::ArrowDown,
        Key::LeftArrow => Code::ArrowLeft,
        Key::RightArrow => Code::ArrowRight,
        Key::ControlLeft => Code::ControlLeft,
        Key::ControlRight => Code::ControlRight,
        Key::ShiftLeft => Code::ShiftLeft,
        Key::ShiftRight => Code::ShiftRight,
        Key::Alt => Code::AltLeft,
        Key::AltGr => Code::AltRight,
        Key::MetaLeft => Code::MetaLeft,
        Key::MetaRight => Code::MetaRight,
        _ => return None,
    };
    Some(code)
}
