//! Custom error types for macro-pulse.
//!
//! Nothing in the runtime loop is fatal: callers log these and fall back to
//! defaults or retry on the next tick. The CLI editing commands surface them
//! to the user.

use std::io;
use thiserror::Error;

/// Main error type for macro-pulse operations.
#[derive(Error, Debug)]
pub enum MacroError {
    /// The specified key is invalid or unsupported.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Error parsing a hotkey combination.
    #[error("invalid key combination '{combo}': {reason}")]
    InvalidKeyCombination { combo: String, reason: String },

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Two macro items share a name.
    #[error("duplicate macro item '{0}'")]
    DuplicateItem(String),

    /// No macro item with this name exists.
    #[error("unknown macro item '{0}'")]
    UnknownItem(String),

    /// Error registering or handling hotkey.
    #[error("hotkey error: {0}")]
    Hotkey(String),

    /// Error injecting a synthetic input event.
    #[error("failed to {action}: {reason}")]
    InputFailed { action: String, reason: String },

    /// Remote version check failed.
    #[error("update check failed: {0}")]
    UpdateCheck(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for macro-pulse operations.
pub type Result<T> = std::result::Result<T, MacroError>;

impl MacroError {
    /// Create a new InvalidKey error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidKeyCombination error.
    pub fn invalid_key_combination(combo: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKeyCombination {
            combo: combo.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigValidation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigSave error.
    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn duplicate_item(name: impl Into<String>) -> Self {
        Self::DuplicateItem(name.into())
    }

    pub fn unknown_item(name: impl Into<String>) -> Self {
        Self::UnknownItem(name.into())
    }

    /// Create a new Hotkey error.
    pub fn hotkey(message: impl Into<String>) -> Self {
        Self::Hotkey(message.into())
    }

    /// Create a new InputFailed error.
    pub fn input_failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InputFailed {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn update_check(message: impl Into<String>) -> Self {
        Self::UpdateCheck(message.into())
    }
}
