//! Control loop that owns the scheduler.
//!
//! Everything that wants to change a run (the hotkey thread, Ctrl-C, the
//! `--run-for` timer, embedding code holding [`App::sender`]) posts an
//! [`AppEvent`] into one channel. The loop handles events one at a time on
//! its own task and redraws the HUD between them.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::hotkey::{parse_hotkey, HotkeyListener};
use crate::hud::{Hud, REFRESH_INTERVAL};
use crate::key_sender::InputSink;
use crate::scheduler::{MacroScheduler, Schedule, Snapshot, DEFAULT_TICK};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Start when idle, stop when running.
    Toggle,
    Start,
    Stop,
    Quit,
    /// Switch one macro item on or off, applied to a running scheduler too.
    SetEnabled { name: String, enabled: bool },
    /// Replace the toggle hotkey for this session.
    Rebind(String),
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub tick: Duration,
    /// Begin a run as soon as the loop starts.
    pub start_immediately: bool,
    /// Stop and exit after this long.
    pub run_for: Option<Duration>,
    pub show_hud: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            start_immediately: false,
            run_for: None,
            show_hud: true,
        }
    }
}

pub struct App {
    config: Config,
    sink: Arc<dyn InputSink>,
    options: AppOptions,
    scheduler: Option<MacroScheduler>,
    snapshots: Option<watch::Receiver<Snapshot>>,
    listener: Option<HotkeyListener>,
    hud: Hud,
    events_tx: mpsc::UnboundedSender<AppEvent>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl App {
    pub fn new(config: Config, sink: Arc<dyn InputSink>, options: AppOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let hud = Hud::new(config.hotkey.clone());
        Self {
            config,
            sink,
            options,
            scheduler: None,
            snapshots: None,
            listener: None,
            hud,
            events_tx,
            events_rx,
        }
    }

    /// Handle for posting events into the loop from other threads.
    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.events_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.as_ref().is_some_and(MacroScheduler::is_running)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Latest snapshot published by the running scheduler.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.snapshots.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Begin a run. Returns `false` when already running or when there is
    /// nothing to do; both cases are logged, never fatal.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        if !self.config.has_work() {
            warn!("nothing enabled: enable at least one macro item or tool use");
            return false;
        }

        let schedule = match Schedule::new(
            self.config.normalized_items(),
            self.config.tool_use.interval(),
        ) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(error = %e, "cannot start with the current items");
                return false;
            }
        };

        let sink = Arc::clone(&self.sink);
        let mut scheduler = MacroScheduler::new(schedule, sink, self.options.tick);
        if let Err(e) = scheduler.start() {
            error!(error = %e, "failed to start scheduler");
            return false;
        }

        self.snapshots = Some(scheduler.subscribe());
        self.scheduler = Some(scheduler);
        true
    }

    /// End the current run. Returns `false` when idle.
    ///
    /// Waits up to [`JOIN_TIMEOUT`](crate::scheduler::JOIN_TIMEOUT) for the
    /// timer thread; on a multi-threaded runtime the wait moves off the
    /// async worker.
    pub fn stop(&mut self) -> bool {
        let Some(mut scheduler) = self.scheduler.take() else {
            return false;
        };
        blocking(|| scheduler.stop());
        let uses = scheduler.snapshot().total_uses();
        info!(total_uses = uses, "run finished");
        self.snapshots = None;
        true
    }

    pub fn toggle(&mut self) -> bool {
        if self.is_running() {
            self.stop()
        } else {
            self.start()
        }
    }

    /// Switch an item on or off in the config and, while running, in the
    /// live schedule. Returns `false` for unknown items.
    pub fn set_item_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if let Err(e) = self.config.set_item_enabled(name, enabled) {
            warn!(error = %e, "cannot change item");
            return false;
        }
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.set_enabled(name.trim(), enabled) {
                warn!(error = %e, "running schedule not updated");
            }
        }
        info!(item = name, enabled, "item updated");
        true
    }

    /// Use a new toggle hotkey from now on. An invalid combination keeps the
    /// current one.
    pub fn rebind(&mut self, hotkey: &str) -> bool {
        let parsed = match parse_hotkey(hotkey) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "keeping the current hotkey");
                return false;
            }
        };

        self.config.hotkey = hotkey.trim().to_string();
        if let Some(listener) = self.listener.as_ref().filter(|l| l.is_active()) {
            listener.rebind(parsed);
        }
        self.hud.set_hotkey(self.config.hotkey.clone());
        info!(hotkey = %self.config.hotkey, "toggle hotkey changed");
        true
    }

    /// Apply one event. Returns `false` when the loop should exit.
    pub fn handle(&mut self, event: AppEvent) -> bool {
        debug!(?event, "app event");
        match event {
            AppEvent::Toggle => {
                self.toggle();
            }
            AppEvent::Start => {
                self.start();
            }
            AppEvent::Stop => {
                self.stop();
            }
            AppEvent::Quit => {
                self.stop();
                return false;
            }
            AppEvent::SetEnabled { name, enabled } => {
                self.set_item_enabled(&name, enabled);
            }
            AppEvent::Rebind(hotkey) => {
                self.rebind(&hotkey);
            }
        }
        true
    }

    fn spawn_hotkey(&self) -> Option<HotkeyListener> {
        let hotkey = match parse_hotkey(&self.config.hotkey) {
            Ok(hotkey) => hotkey,
            Err(e) => {
                warn!(error = %e, "invalid hotkey, toggling is disabled");
                return None;
            }
        };

        match HotkeyListener::spawn(hotkey, self.sender(), AppEvent::Toggle) {
            Ok(listener) => {
                info!(hotkey = %self.config.hotkey, "global toggle hotkey active");
                Some(listener)
            }
            Err(e) => {
                warn!(error = %e, "could not register hotkey, continuing without it");
                None
            }
        }
    }

    /// Run until [`AppEvent::Quit`], Ctrl-C or the `run_for` deadline.
    pub async fn run(mut self) -> Result<()> {
        self.listener = self.spawn_hotkey();

        println!(
            "{} press {} to start/stop, Ctrl-C to quit",
            "macro-pulse".bold(),
            self.config.hotkey.cyan()
        );

        if self.options.start_immediately {
            self.start();
        }

        let run_for = self.options.run_for;
        let deadline = async move {
            match run_for {
                Some(limit) => tokio::time::sleep(limit).await,
                None => pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    if !self.handle(event) {
                        break;
                    }
                }
                _ = refresh.tick() => {
                    if self.options.show_hud {
                        let snapshot = self.latest_snapshot();
                        let running = self.is_running();
                        self.hud.render(running, snapshot.as_ref());
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "ctrl-c handler failed");
                    }
                    break;
                }
                _ = &mut deadline => {
                    info!("run time elapsed");
                    break;
                }
            }
        }

        self.stop();
        if self.options.show_hud {
            self.hud.render(false, None);
            self.hud.detach();
        }
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        Ok(())
    }
}

/// Run a short blocking call, stepping off the async worker when the
/// runtime allows it.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MacroItem;
    use crate::key_sender::DryRunSender;
    use global_hotkey::hotkey::Code;

    fn app_with(config: Config) -> App {
        let options = AppOptions {
            tick: Duration::from_millis(10),
            show_hud: false,
            ..AppOptions::default()
        };
        App::new(config, Arc::new(DryRunSender), options)
    }

    #[test]
    fn test_start_refused_when_nothing_enabled() {
        let mut config = Config::default();
        for item in &mut config.items {
            item.enabled = false;
        }
        let mut app = app_with(config);
        assert!(!app.start());
        assert!(!app.is_running());
    }

    #[test]
    fn test_start_refused_with_bad_key() {
        let mut config = Config::default();
        config.items = vec![MacroItem::new("a", "not-a-key", 1000)];
        let mut app = app_with(config);
        assert!(!app.start());
    }

    #[test]
    fn test_toggle_lifecycle() {
        let mut app = app_with(Config::default());

        assert!(!app.stop());
        assert!(app.toggle());
        assert!(app.is_running());
        assert!(!app.start());
        assert!(app.latest_snapshot().is_some());

        assert!(app.toggle());
        assert!(!app.is_running());
        assert!(app.latest_snapshot().is_none());
    }

    #[test]
    fn test_quit_stops_run() {
        let mut app = app_with(Config::default());
        assert!(app.handle(AppEvent::Start));
        assert!(app.is_running());
        assert!(!app.handle(AppEvent::Quit));
        assert!(!app.is_running());
    }

    #[test]
    fn test_set_enabled_event_reaches_running_schedule() {
        let mut app = app_with(Config::default());
        assert!(app.start());

        assert!(app.handle(AppEvent::SetEnabled {
            name: "Gumdrop".into(),
            enabled: false,
        }));
        assert!(!app.config().item("Gumdrop").unwrap().enabled);

        // applied by the timer thread on its next tick
        std::thread::sleep(Duration::from_millis(100));
        let snapshot = app.latest_snapshot().unwrap();
        assert!(!snapshot.get("Gumdrop").unwrap().enabled);
        assert!(snapshot.get("Stinger").unwrap().enabled);

        assert!(!app.set_item_enabled("Missing", false));
        app.stop();
    }

    #[test]
    fn test_set_enabled_while_idle_applies_on_next_start() {
        let mut app = app_with(Config::default());
        app.handle(AppEvent::SetEnabled {
            name: "Snowflake".into(),
            enabled: false,
        });
        assert!(app.start());
        let snapshot = app.latest_snapshot().unwrap();
        assert!(!snapshot.get("Snowflake").unwrap().enabled);
        app.stop();
    }

    #[test]
    fn test_rebind_event_updates_listener_and_hud() {
        let mut app = app_with(Config::default());
        app.listener = Some(HotkeyListener::unhooked(parse_hotkey("Ctrl+Q").unwrap()));

        assert!(app.handle(AppEvent::Rebind("alt+f2".into())));
        assert_eq!(app.config().hotkey, "alt+f2");
        assert_eq!(app.listener.as_ref().unwrap().hotkey().key, Code::F2);
        let header = &app.hud.lines(false, None, std::time::Instant::now())[0];
        assert!(header.contains("alt+f2"), "{header}");

        // an invalid combination leaves everything as it was
        assert!(!app.rebind("ctrl+alt"));
        assert_eq!(app.config().hotkey, "alt+f2");
        assert_eq!(app.listener.as_ref().unwrap().hotkey().key, Code::F2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_on_multi_thread_runtime() {
        let mut app = app_with(Config::default());
        assert!(app.start());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(app.stop());
        assert!(!app.is_running());
    }

    #[tokio::test]
    async fn test_run_exits_on_quit_event() {
        let mut config = Config::default();
        config.hotkey = "not+a+hotkey".into();
        let app = app_with(config);
        let tx = app.sender();
        tx.send(AppEvent::Start).unwrap();
        tx.send(AppEvent::Quit).unwrap();

        tokio::time::timeout(Duration::from_secs(5), app.run())
            .await
            .expect("run loop did not exit")
            .unwrap();
    }
}
