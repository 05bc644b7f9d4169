//! Terminal heads-up display.
//!
//! Renders the latest [`Snapshot`] as a small block of countdown lines and
//! redraws it in place when stdout is a terminal.

use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};

use colored::Colorize;
use tracing::debug;

use crate::scheduler::{EntrySnapshot, Snapshot};

/// How often the display refreshes.
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// How often a non-interactive display logs a summary instead.
const LOG_INTERVAL: Duration = Duration::from_secs(5);

/// One display line for an entry, e.g. `Gumdrop [2] next: 1.4s, uses: 3`.
pub fn format_entry(entry: &EntrySnapshot, now: Instant) -> String {
    if !entry.enabled {
        return format!(
            "{} [{}] disabled, uses: {}",
            entry.name, entry.key, entry.state.uses
        );
    }
    let remaining = entry.state.remaining(now).as_secs_f64();
    format!(
        "{} [{}] next: {:.1}s, uses: {}",
        entry.name, entry.key, remaining, entry.state.uses
    )
}

pub struct Hud {
    hotkey: String,
    interactive: bool,
    drawn_lines: usize,
    last_log: Option<Instant>,
}

impl Hud {
    pub fn new(hotkey: impl Into<String>) -> Self {
        Self {
            hotkey: hotkey.into(),
            interactive: io::stdout().is_terminal(),
            drawn_lines: 0,
            last_log: None,
        }
    }

    pub fn set_hotkey(&mut self, hotkey: impl Into<String>) {
        self.hotkey = hotkey.into();
    }

    /// Text of the whole display, header first.
    pub fn lines(&self, running: bool, snapshot: Option<&Snapshot>, now: Instant) -> Vec<String> {
        let mut lines = Vec::new();
        let status = if running {
            "RUNNING".green().bold().to_string()
        } else {
            "IDLE".yellow().bold().to_string()
        };
        lines.push(format!(
            "macro-pulse {status}  (toggle: {})",
            self.hotkey.cyan()
        ));

        if let Some(snapshot) = snapshot.filter(|_| running) {
            for entry in &snapshot.entries {
                let line = format_entry(entry, now);
                if entry.enabled {
                    lines.push(format!("  {line}"));
                } else {
                    lines.push(format!("  {}", line.dimmed()));
                }
            }
        }
        lines
    }

    pub fn render(&mut self, running: bool, snapshot: Option<&Snapshot>) {
        let now = Instant::now();

        if !self.interactive {
            let due = self
                .last_log
                .is_none_or(|last| now.duration_since(last) >= LOG_INTERVAL);
            if running && due {
                if let Some(snapshot) = snapshot {
                    for entry in &snapshot.entries {
                        debug!("{}", format_entry(entry, now));
                    }
                }
                self.last_log = Some(now);
            }
            return;
        }

        let lines = self.lines(running, snapshot, now);
        let mut stdout = io::stdout().lock();
        let mut frame = String::new();
        if self.drawn_lines > 0 {
            frame.push_str(&format!("\x1b[{}F", self.drawn_lines));
        }
        for line in &lines {
            frame.push_str("\x1b[2K");
            frame.push_str(line);
            frame.push('\n');
        }
        // wipe leftovers when the block shrank
        for _ in lines.len()..self.drawn_lines {
            frame.push_str("\x1b[2K\n");
        }
        let extra = self.drawn_lines.saturating_sub(lines.len());
        if extra > 0 {
            frame.push_str(&format!("\x1b[{extra}F"));
        }

        if stdout.write_all(frame.as_bytes()).and_then(|_| stdout.flush()).is_ok() {
            self.drawn_lines = lines.len();
        }
    }

    /// Forget the drawn block so the next render starts on a fresh line.
    pub fn detach(&mut self) {
        self.drawn_lines = 0;
    }
}
