//! # macro-pulse
//!
//! Fires synthetic key presses (and optionally left clicks) on per-item
//! timers with randomized jitter, toggled by a global hotkey, with a live
//! countdown display.
//!
//! ## Features
//!
//! - Any number of macro items, each with its own key, interval and jitter range
//! - Optional "tool use" left-click loop on its own interval
//! - Global toggle hotkey (`Ctrl+Q` by default) with 350 ms debounce
//! - Terminal HUD with countdowns and use-counts
//! - JSON configuration with defaults merged into existing files
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use macro_pulse::{Config, KeySender, MacroScheduler, Schedule};
//!
//! let config = Config::default();
//! let schedule = Schedule::new(config.normalized_items(), config.tool_use.interval()).unwrap();
//! let sender = Arc::new(KeySender::new().unwrap());
//!
//! let mut scheduler = MacroScheduler::new(schedule, sender, Duration::from_millis(50));
//! scheduler.start().unwrap();
//! std::thread::sleep(Duration::from_secs(10));
//! scheduler.stop();
//! ```
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "hotkey": "Ctrl+Q",
//!   "overlay": {"x": 40, "y": 40, "always_on_top": true, "opacity": 0.95},
//!   "tool_use": {"enabled": false, "interval_ms": 30},
//!   "items": [
//!     {"name": "Snowflake", "key": "7", "interval_ms": 9500,
//!      "jitter_min_ms": 200, "jitter_max_ms": 400, "enabled": true}
//!   ]
//! }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod hotkey;
pub mod hud;
pub mod key_sender;
pub mod scheduler;
pub mod version;

pub use app::{App, AppEvent, AppOptions};
pub use config::{Config, MacroItem};
pub use error::{MacroError, Result};
pub use hotkey::{ComboMatcher, HotkeyListener};
pub use key_sender::{DryRunSender, InputSink, KeySender, MacroKey};
pub use scheduler::{ItemState, MacroScheduler, Schedule, Snapshot};
