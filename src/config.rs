//! Persisted configuration.
//!
//! The config lives in a single JSON document. Loading deep-merges the
//! built-in defaults with whatever is on disk and rewrites the file, so new
//! fields appear in old files automatically.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MacroError, Result};
use crate::hotkey::parse_hotkey;
use crate::key_sender::MacroKey;

pub const DEFAULT_HOTKEY: &str = "Ctrl+Q";
pub const CONFIG_FILE_NAME: &str = "macro-pulse.cfg";
const APP_DIR_NAME: &str = "MacroPulse";
const HOME_DIR_NAME: &str = ".macro-pulse";

/// Shortest interval an item may run at after normalization.
pub const MIN_INTERVAL_MS: i64 = 50;
/// Shortest delay between tool-use clicks.
pub const MIN_TOOL_USE_INTERVAL_MS: i64 = 10;

/// One timed key press.
///
/// Timing fields are signed and read leniently so a hand-edited record with a
/// negative or quoted number still loads; [`MacroItem::normalized`] clamps
/// them before a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroItem {
    #[serde(default = "default_item_name")]
    pub name: String,
    #[serde(default = "default_item_key")]
    pub key: String,
    #[serde(default = "default_interval_ms", deserialize_with = "lenient_ms")]
    pub interval_ms: i64,
    #[serde(default, deserialize_with = "lenient_ms")]
    pub jitter_min_ms: i64,
    #[serde(default, deserialize_with = "lenient_ms")]
    pub jitter_max_ms: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl MacroItem {
    pub fn new(name: impl Into<String>, key: impl Into<String>, interval_ms: i64) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            interval_ms,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            enabled: true,
        }
    }

    pub fn with_jitter(mut self, min_ms: i64, max_ms: i64) -> Self {
        self.jitter_min_ms = min_ms;
        self.jitter_max_ms = max_ms;
        self
    }

    /// Clamp the timing fields into a runnable shape: the interval is at
    /// least [`MIN_INTERVAL_MS`], jitter is never negative and its upper
    /// bound never sits below the lower bound.
    pub fn normalized(&self) -> Self {
        let mut item = self.clone();
        item.name = item.name.trim().to_string();
        item.interval_ms = item.interval_ms.max(MIN_INTERVAL_MS);
        item.jitter_min_ms = item.jitter_min_ms.max(0);
        item.jitter_max_ms = item.jitter_max_ms.max(item.jitter_min_ms);
        item
    }

    pub fn parsed_key(&self) -> Result<MacroKey> {
        self.key.parse()
    }

    pub fn interval(&self) -> Duration {
        millis(self.interval_ms)
    }
}

/// Placement of the heads-up display window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_overlay_pos")]
    pub x: i32,
    #[serde(default = "default_overlay_pos")]
    pub y: i32,
    #[serde(default = "default_true")]
    pub always_on_top: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            x: default_overlay_pos(),
            y: default_overlay_pos(),
            always_on_top: true,
            opacity: default_opacity(),
        }
    }
}

/// Optional left-click loop that runs alongside the macro items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tool_use_interval_ms", deserialize_with = "lenient_ms")]
    pub interval_ms: i64,
}

impl Default for ToolUseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_tool_use_interval_ms(),
        }
    }
}

impl ToolUseConfig {
    /// Click interval, or `None` when the loop is disabled.
    pub fn interval(&self) -> Option<Duration> {
        self.enabled
            .then(|| millis(self.interval_ms.max(MIN_TOOL_USE_INTERVAL_MS)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_hotkey")]
    pub hotkey: String,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub tool_use: ToolUseConfig,
    #[serde(default = "default_items")]
    pub items: Vec<MacroItem>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey: default_hotkey(),
            overlay: OverlayConfig::default(),
            tool_use: ToolUseConfig::default(),
            items: default_items(),
        }
    }
}

impl Config {
    /// Parse a config file exactly as written, without merging defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))?;
        serde_json::from_str(&content)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| MacroError::config_save(path.display().to_string(), e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| MacroError::config_save(path.display().to_string(), e.to_string()))?;
        Ok(())
    }

    /// Load the config at `path`, filling every missing field from the
    /// defaults, and write the merged document back.
    ///
    /// A missing file is created with the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config not found, writing defaults");
            let config = Self::default();
            config.save_to_file(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))?;
        let user: Value = serde_json::from_str(&content)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))?;

        let merged = deep_merge(serde_json::to_value(Self::default())?, user);
        let config: Self = serde_json::from_value(merged)
            .map_err(|e| MacroError::config_load(path.display().to_string(), e.to_string()))?;

        // the merged config is usable even when the file cannot be rewritten
        if let Err(e) = config.save_to_file(path) {
            warn!(path = %path.display(), error = %e, "could not rewrite merged config");
        }
        Ok(config)
    }

    /// Like [`Config::load`] but never fails: a broken file is left alone and
    /// the defaults are used for this run.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        parse_hotkey(&self.hotkey)?;

        if !(0.0..=1.0).contains(&self.overlay.opacity) {
            return Err(MacroError::config_validation(format!(
                "overlay opacity must be between 0 and 1, got {}",
                self.overlay.opacity
            )));
        }

        if self.tool_use.enabled && self.tool_use.interval_ms <= 0 {
            return Err(MacroError::config_validation(
                "tool_use interval_ms must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            let name = item.name.trim();
            if name.is_empty() {
                return Err(MacroError::config_validation("item name cannot be empty"));
            }
            if !seen.insert(name) {
                return Err(MacroError::duplicate_item(name));
            }
            if item.interval_ms <= 0 {
                return Err(MacroError::config_validation(format!(
                    "item '{name}': interval_ms must be greater than 0"
                )));
            }
            item.parsed_key()?;
        }

        Ok(())
    }

    /// Items with timing clamped via [`MacroItem::normalized`].
    pub fn normalized_items(&self) -> Vec<MacroItem> {
        self.items.iter().map(MacroItem::normalized).collect()
    }

    /// Whether starting a run would do anything at all.
    pub fn has_work(&self) -> bool {
        self.tool_use.enabled || self.items.iter().any(|item| item.enabled)
    }

    pub fn item(&self, name: &str) -> Option<&MacroItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn add_item(&mut self, item: MacroItem) -> Result<()> {
        let item = item.normalized();
        if item.name.is_empty() {
            return Err(MacroError::config_validation("item name cannot be empty"));
        }
        if self.item(&item.name).is_some() {
            return Err(MacroError::duplicate_item(item.name));
        }
        item.parsed_key()?;
        self.items.push(item);
        Ok(())
    }

    pub fn remove_item(&mut self, name: &str) -> Result<MacroItem> {
        let index = self
            .items
            .iter()
            .position(|item| item.name == name)
            .ok_or_else(|| MacroError::unknown_item(name))?;
        Ok(self.items.remove(index))
    }

    pub fn set_item_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.name == name)
            .ok_or_else(|| MacroError::unknown_item(name))?;
        item.enabled = enabled;
        Ok(())
    }
}

/// Recursively overlay `user` on top of `defaults`.
///
/// Objects merge key by key; any other value in `user` (arrays included)
/// replaces the default outright.
pub fn deep_merge(defaults: Value, user: Value) -> Value {
    match (defaults, user) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => {
                        let current = existing.take();
                        *existing = deep_merge(current, value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        (_, user) => user,
    }
}

/// Pick where the config file lives: next to the executable when that
/// directory is writable, otherwise a per-user directory.
pub fn resolve_config_path() -> PathBuf {
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        if is_writable_dir(&exe_dir) {
            return exe_dir.join(CONFIG_FILE_NAME);
        }
    }
    user_config_path()
}

fn user_config_path() -> PathBuf {
    if let Some(appdata) = std::env::var_os("APPDATA").filter(|v| !v.is_empty()) {
        return PathBuf::from(appdata).join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(HOME_DIR_NAME).join(CONFIG_FILE_NAME)
}

pub fn is_writable_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".write_test");
    let ok = fs::write(&probe, b"x").is_ok();
    let _ = fs::remove_file(&probe);
    ok
}

/// Parse a human duration such as `500ms`, `2s`, `5m` or `1h`.
/// A bare number is taken as milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let value = input.trim().to_lowercase();
    if value.is_empty() {
        return Err(MacroError::invalid_duration(input, "empty duration"));
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    if digits.is_empty() {
        return Err(MacroError::invalid_duration(input, "expected a number"));
    }

    let amount: u64 = digits
        .parse()
        .map_err(|_| MacroError::invalid_duration(input, "number out of range"))?;

    let duration = match unit.trim() {
        "" | "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        other => {
            return Err(MacroError::invalid_duration(
                input,
                format!("unknown unit '{other}'"),
            ))
        }
    };
    Ok(duration)
}

/// Accept a millisecond count written as an integer, a float or a numeric
/// string. Negative values are kept and clamped later.
fn lenient_ms<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let ms = match &value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    };
    ms.ok_or_else(|| {
        serde::de::Error::custom(format!("expected a number of milliseconds, got {value}"))
    })
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0).unsigned_abs())
}

fn default_hotkey() -> String {
    DEFAULT_HOTKEY.to_string()
}

fn default_item_name() -> String {
    "Item".to_string()
}

fn default_item_key() -> String {
    "2".to_string()
}

fn default_interval_ms() -> i64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_overlay_pos() -> i32 {
    40
}

fn default_opacity() -> f32 {
    0.95
}

fn default_tool_use_interval_ms() -> i64 {
    30
}

fn default_items() -> Vec<MacroItem> {
    vec![
        MacroItem::new("Gumdrop", "2", 3000),
        MacroItem::new("Jelly Beans", "3", 9500),
        MacroItem::new("Snowflake", "7", 9500).with_jitter(200, 400),
        MacroItem::new("Stinger", "6", 9500),
    ]
}
