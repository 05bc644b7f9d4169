//! Timed firing of macro items.
//!
//! [`Schedule`] holds the deadline arithmetic and is driven by an explicit
//! clock value, so it can be tested without threads. [`MacroScheduler`] owns
//! a background thread that ticks a shared `Schedule` at a fixed granularity,
//! fires due items through an [`InputSink`] and publishes a [`Snapshot`] of
//! every entry on a `watch` channel after each tick.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::MacroItem;
use crate::error::{MacroError, Result};
use crate::key_sender::{InputSink, MacroKey};

/// Name of the synthetic entry for the tool-use click loop.
pub const TOOL_USE_NAME: &str = "Tool use";

/// Default polling granularity of the timer loop.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);
pub const MIN_TICK: Duration = Duration::from_millis(10);
pub const MAX_TICK: Duration = Duration::from_millis(1000);

/// How long [`MacroScheduler::stop`] waits for the timer thread.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Live counters for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemState {
    pub uses: u64,
    pub last_fire: Option<Instant>,
    pub next_fire: Instant,
}

impl ItemState {
    fn armed(now: Instant, first_delay: Duration) -> Self {
        Self {
            uses: 0,
            last_fire: None,
            next_fire: now + first_delay,
        }
    }

    /// Time left until the next fire, zero when overdue.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_fire.saturating_duration_since(now)
    }
}

/// Copy of one entry as seen at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub name: String,
    pub key: String,
    pub enabled: bool,
    pub state: ItemState,
}

/// Immutable copy of every entry, in configuration order with the tool-use
/// entry last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub taken_at: Instant,
    pub entries: Vec<EntrySnapshot>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&EntrySnapshot> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn total_uses(&self) -> u64 {
        self.entries.iter().map(|entry| entry.state.uses).sum()
    }
}

#[derive(Debug)]
struct Entry {
    item: MacroItem,
    key: MacroKey,
    state: ItemState,
}

#[derive(Debug)]
struct ToolUse {
    interval: Duration,
    state: ItemState,
}

/// Random extra delay for one fire of `item`, in whole milliseconds.
///
/// Only applied when `jitter_max_ms > 0` and the bounds are ordered;
/// otherwise zero.
pub fn jitter<R: Rng + ?Sized>(item: &MacroItem, rng: &mut R) -> Duration {
    if item.jitter_max_ms > 0 && item.jitter_max_ms >= item.jitter_min_ms {
        let min = item.jitter_min_ms.max(0);
        Duration::from_millis(rng.gen_range(min..=item.jitter_max_ms).unsigned_abs())
    } else {
        Duration::ZERO
    }
}

/// Deadline bookkeeping for a set of macro items plus the optional
/// tool-use click loop.
#[derive(Debug)]
pub struct Schedule {
    entries: Vec<Entry>,
    tool_use: Option<ToolUse>,
    rng: StdRng,
}

impl Schedule {
    /// Build a schedule. Keys are parsed and names must be unique. All
    /// deadlines are armed relative to `Instant::now()`; call
    /// [`Schedule::reset`] to re-arm them.
    pub fn new(items: Vec<MacroItem>, tool_use: Option<Duration>) -> Result<Self> {
        Self::with_rng(items, tool_use, StdRng::from_entropy())
    }

    pub fn with_seed(items: Vec<MacroItem>, tool_use: Option<Duration>, seed: u64) -> Result<Self> {
        Self::with_rng(items, tool_use, StdRng::seed_from_u64(seed))
    }

    fn with_rng(items: Vec<MacroItem>, tool_use: Option<Duration>, rng: StdRng) -> Result<Self> {
        let now = Instant::now();
        let mut names = HashSet::new();
        let mut entries = Vec::with_capacity(items.len());

        for item in items {
            if !names.insert(item.name.clone()) || item.name == TOOL_USE_NAME {
                return Err(MacroError::duplicate_item(item.name));
            }
            let key = item.parsed_key()?;
            let state = ItemState::armed(now, item.interval());
            entries.push(Entry { item, key, state });
        }

        let tool_use = tool_use.map(|interval| ToolUse {
            interval,
            state: ItemState::armed(now, interval),
        });

        Ok(Self {
            entries,
            tool_use,
            rng,
        })
    }

    /// Zero every use-count and arm every deadline at `now + interval`.
    pub fn reset(&mut self, now: Instant) {
        for entry in &mut self.entries {
            entry.state = ItemState::armed(now, entry.item.interval());
        }
        if let Some(tool) = &mut self.tool_use {
            tool.state = ItemState::armed(now, tool.interval);
        }
    }

    /// Fire every enabled entry whose deadline has passed and schedule its
    /// next fire. Returns how many entries fired.
    ///
    /// A failed injection is logged and still counts as a fire so the entry
    /// retries on its next deadline rather than on every tick.
    pub fn tick(&mut self, now: Instant, sink: &dyn InputSink) -> usize {
        let mut fired = 0;

        for entry in &mut self.entries {
            if !entry.item.enabled || now < entry.state.next_fire {
                continue;
            }

            if let Err(e) = sink.press_key(entry.key) {
                warn!(item = %entry.item.name, error = %e, "key injection failed");
            }

            let delay = entry.item.interval() + jitter(&entry.item, &mut self.rng);
            entry.state.uses += 1;
            entry.state.last_fire = Some(now);
            entry.state.next_fire = now + delay;
            fired += 1;
        }

        if let Some(tool) = &mut self.tool_use {
            if now >= tool.state.next_fire {
                if let Err(e) = sink.click_left() {
                    warn!(error = %e, "tool-use click failed");
                }
                tool.state.uses += 1;
                tool.state.last_fire = Some(now);
                tool.state.next_fire = now + tool.interval;
                fired += 1;
            }
        }

        fired
    }

    /// Enable or disable one item. Other entries' deadlines are untouched.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.item.name == name)
            .ok_or_else(|| MacroError::unknown_item(name))?;
        entry.item.enabled = enabled;
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<ItemState> {
        if name == TOOL_USE_NAME {
            return self.tool_use.as_ref().map(|tool| tool.state);
        }
        self.entries
            .iter()
            .find(|entry| entry.item.name == name)
            .map(|entry| entry.state)
    }

    /// Whether a run would fire anything.
    pub fn has_work(&self) -> bool {
        self.tool_use.is_some() || self.entries.iter().any(|entry| entry.item.enabled)
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let mut entries: Vec<EntrySnapshot> = self
            .entries
            .iter()
            .map(|entry| EntrySnapshot {
                name: entry.item.name.clone(),
                key: entry.key.to_string(),
                enabled: entry.item.enabled,
                state: entry.state,
            })
            .collect();

        if let Some(tool) = &self.tool_use {
            entries.push(EntrySnapshot {
                name: TOOL_USE_NAME.to_string(),
                key: "click".to_string(),
                enabled: true,
                state: tool.state,
            });
        }

        Snapshot {
            taken_at: now,
            entries,
        }
    }
}

/// Messages applied by the timer thread at the start of a tick.
#[derive(Debug, Clone)]
enum Command {
    SetEnabled { name: String, enabled: bool },
}

struct Worker {
    stop: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
    done: std_mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Owner of the timer thread.
///
/// `start` and `stop` may be called any number of times; each start resets
/// use-counts and re-arms deadlines from the current instant.
pub struct MacroScheduler {
    schedule: Arc<Mutex<Schedule>>,
    sink: Arc<dyn InputSink>,
    tick: Duration,
    updates: Arc<watch::Sender<Snapshot>>,
    worker: Option<Worker>,
}

impl MacroScheduler {
    pub fn new(schedule: Schedule, sink: Arc<dyn InputSink>, tick: Duration) -> Self {
        let (updates, _) = watch::channel(schedule.snapshot(Instant::now()));
        Self {
            schedule: Arc::new(Mutex::new(schedule)),
            sink,
            tick: tick.clamp(MIN_TICK, MAX_TICK),
            updates: Arc::new(updates),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Receive a fresh [`Snapshot`] after every tick.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    /// Lock-protected copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.schedule.lock().snapshot(Instant::now())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let now = Instant::now();
        {
            let mut schedule = self.schedule.lock();
            schedule.reset(now);
            self.updates.send_replace(schedule.snapshot(now));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (done_tx, done) = std_mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let schedule = Arc::clone(&self.schedule);
        let sink = Arc::clone(&self.sink);
        let updates = Arc::clone(&self.updates);
        let tick = self.tick;

        let handle = thread::Builder::new()
            .name("macro-timer".into())
            .spawn(move || {
                run_loop(schedule, sink, updates, command_rx, thread_stop, tick);
                let _ = done_tx.send(());
            })?;

        info!(tick_ms = self.tick.as_millis() as u64, "scheduler started");
        self.worker = Some(Worker {
            stop,
            commands,
            done,
            handle,
        });
        Ok(())
    }

    /// Signal the timer thread and wait up to [`JOIN_TIMEOUT`] for it to
    /// finish. A thread that does not finish in time is detached.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        match worker.done.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("timer thread panicked");
                }
                info!("scheduler stopped");
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = JOIN_TIMEOUT.as_millis() as u64,
                    "timer thread did not stop in time, detaching"
                );
            }
        }
    }

    /// Enable or disable an item. While running the change is applied by the
    /// timer thread on its next tick.
    ///
    /// The tool-use entry cannot be toggled this way.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut schedule = self.schedule.lock();
        if name == TOOL_USE_NAME || schedule.state(name).is_none() {
            return Err(MacroError::unknown_item(name));
        }

        match &self.worker {
            Some(worker) => {
                let command = Command::SetEnabled {
                    name: name.to_string(),
                    enabled,
                };
                if worker.commands.send(command).is_err() {
                    schedule.set_enabled(name, enabled)?;
                }
                Ok(())
            }
            None => schedule.set_enabled(name, enabled),
        }
    }
}

impl Drop for MacroScheduler {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.stop.store(true, Ordering::Release);
        }
    }
}

fn run_loop(
    schedule: Arc<Mutex<Schedule>>,
    sink: Arc<dyn InputSink>,
    updates: Arc<watch::Sender<Snapshot>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    stop: Arc<AtomicBool>,
    tick: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();

        let snapshot = {
            let mut schedule = schedule.lock();
            while let Ok(command) = commands.try_recv() {
                match command {
                    Command::SetEnabled { name, enabled } => {
                        if let Err(e) = schedule.set_enabled(&name, enabled) {
                            warn!(error = %e, "ignoring enable change");
                        } else {
                            debug!(item = %name, enabled, "item toggled");
                        }
                    }
                }
            }

            let fired = schedule.tick(now, sink.as_ref());
            if fired > 0 {
                debug!(fired, "tick fired entries");
            }
            schedule.snapshot(now)
        };

        updates.send_replace(snapshot);
        thread::sleep(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct RecordingSink {
        keys: PlMutex<Vec<MacroKey>>,
        clicks: PlMutex<u32>,
    }

    impl InputSink for RecordingSink {
        fn press_key(&self, key: MacroKey) -> Result<()> {
            self.keys.lock().push(key);
            Ok(())
        }

        fn click_left(&self) -> Result<()> {
            *self.clicks.lock() += 1;
            Ok(())
        }
    }

    struct FailingSink;

    impl InputSink for FailingSink {
        fn press_key(&self, key: MacroKey) -> Result<()> {
            Err(MacroError::input_failed(format!("press key '{key}'"), "no display"))
        }

        fn click_left(&self) -> Result<()> {
            Err(MacroError::input_failed("click", "no display"))
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let item = MacroItem::new("a", "2", 1000).with_jitter(200, 400);
        for _ in 0..500 {
            let extra = jitter(&item, &mut rng);
            assert!(extra >= ms(200) && extra <= ms(400), "{extra:?}");
        }
    }

    #[test]
    fn test_no_jitter_when_max_zero_or_inverted() {
        let mut rng = StdRng::seed_from_u64(7);
        let none = MacroItem::new("a", "2", 1000).with_jitter(100, 0);
        let inverted = MacroItem::new("b", "2", 1000).with_jitter(300, 200);
        assert_eq!(jitter(&none, &mut rng), Duration::ZERO);
        assert_eq!(jitter(&inverted, &mut rng), Duration::ZERO);
    }

    #[test]
    fn test_first_fire_after_interval() {
        let sink = RecordingSink::default();
        let mut schedule =
            Schedule::with_seed(vec![MacroItem::new("a", "2", 1000)], None, 1).unwrap();
        let start = Instant::now();
        schedule.reset(start);

        assert_eq!(schedule.tick(start + ms(999), &sink), 0);
        assert_eq!(schedule.tick(start + ms(1000), &sink), 1);
        assert_eq!(sink.keys.lock().as_slice(), &[MacroKey::Char('2')]);

        let state = schedule.state("a").unwrap();
        assert_eq!(state.uses, 1);
        assert_eq!(state.last_fire, Some(start + ms(1000)));
        assert_eq!(state.next_fire, start + ms(2000));
    }

    #[test]
    fn test_tool_use_follows_own_interval() {
        let sink = RecordingSink::default();
        let mut schedule = Schedule::with_seed(vec![], Some(ms(30)), 1).unwrap();
        let start = Instant::now();
        schedule.reset(start);

        assert_eq!(schedule.tick(start + ms(30), &sink), 1);
        assert_eq!(schedule.tick(start + ms(50), &sink), 0);
        assert_eq!(schedule.tick(start + ms(60), &sink), 1);
        assert_eq!(*sink.clicks.lock(), 2);
        assert_eq!(schedule.state(TOOL_USE_NAME).unwrap().uses, 2);

        let snapshot = schedule.snapshot(start);
        assert_eq!(snapshot.entries.last().unwrap().name, TOOL_USE_NAME);
    }

    #[test]
    fn test_failed_injection_still_advances() {
        let mut schedule =
            Schedule::with_seed(vec![MacroItem::new("a", "2", 100)], Some(ms(100)), 1).unwrap();
        let start = Instant::now();
        schedule.reset(start);

        assert_eq!(schedule.tick(start + ms(100), &FailingSink), 2);
        assert_eq!(schedule.state("a").unwrap().next_fire, start + ms(200));
        assert_eq!(schedule.tick(start + ms(150), &FailingSink), 0);
    }

    #[test]
    fn test_duplicate_and_reserved_names_rejected() {
        let dup = vec![MacroItem::new("a", "2", 100), MacroItem::new("a", "3", 100)];
        assert!(matches!(
            Schedule::new(dup, None),
            Err(MacroError::DuplicateItem(_))
        ));

        let reserved = vec![MacroItem::new(TOOL_USE_NAME, "2", 100)];
        assert!(Schedule::new(reserved, None).is_err());

        let bad_key = vec![MacroItem::new("a", "notakey", 100)];
        assert!(matches!(
            Schedule::new(bad_key, None),
            Err(MacroError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_snapshot_preserves_order_and_flags() {
        let mut disabled = MacroItem::new("b", "space", 100);
        disabled.enabled = false;
        let schedule = Schedule::with_seed(
            vec![MacroItem::new("a", "2", 100), disabled],
            None,
            1,
        )
        .unwrap();

        let snapshot = schedule.snapshot(Instant::now());
        let names: Vec<&str> = snapshot.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snapshot.get("b").unwrap().key, "space");
        assert!(!snapshot.get("b").unwrap().enabled);
        assert_eq!(snapshot.total_uses(), 0);
    }

    #[test]
    fn test_scheduler_thread_fires_and_stops() {
        let sink = Arc::new(RecordingSink::default());
        let schedule =
            Schedule::with_seed(vec![MacroItem::new("a", "2", 50)], None, 1).unwrap();
        let mut scheduler = MacroScheduler::new(schedule, sink.clone(), ms(10));
        let mut updates = scheduler.subscribe();

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        thread::sleep(ms(300));
        scheduler.stop();
        assert!(!scheduler.is_running());

        let uses = scheduler.snapshot().get("a").unwrap().state.uses;
        assert!(uses >= 2, "expected several fires, got {uses}");
        assert_eq!(sink.keys.lock().len() as u64, uses);
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().get("a").unwrap().state.uses, uses);

        // nothing fires after stop
        thread::sleep(ms(120));
        assert_eq!(sink.keys.lock().len() as u64, uses);
    }

    #[test]
    fn test_set_enabled_unknown_item() {
        let schedule = Schedule::with_seed(vec![MacroItem::new("a", "2", 50)], None, 1).unwrap();
        let scheduler = MacroScheduler::new(schedule, Arc::new(RecordingSink::default()), ms(10));
        assert!(matches!(
            scheduler.set_enabled("missing", false),
            Err(MacroError::UnknownItem(_))
        ));
        scheduler.set_enabled("a", false).unwrap();
        assert!(!scheduler.snapshot().get("a").unwrap().enabled);
    }

    #[test]
    fn test_set_enabled_rejects_tool_use_entry() {
        let schedule =
            Schedule::with_seed(vec![MacroItem::new("a", "2", 50)], Some(ms(30)), 1).unwrap();
        let mut scheduler =
            MacroScheduler::new(schedule, Arc::new(RecordingSink::default()), ms(10));

        assert!(matches!(
            scheduler.set_enabled(TOOL_USE_NAME, false),
            Err(MacroError::UnknownItem(_))
        ));

        scheduler.start().unwrap();
        let running = scheduler.set_enabled(TOOL_USE_NAME, false);
        scheduler.stop();
        assert!(matches!(running, Err(MacroError::UnknownItem(_))));
    }

    #[test]
    fn test_jitter_ignores_negative_lower_bound() {
        let mut rng = StdRng::seed_from_u64(3);
        let item = MacroItem::new("a", "2", 1000).with_jitter(-50, 20);
        for _ in 0..200 {
            assert!(jitter(&item, &mut rng) <= ms(20));
        }
    }

    #[test]
    fn test_tick_is_clamped() {
        let schedule = Schedule::with_seed(vec![], None, 1).unwrap();
        let scheduler = MacroScheduler::new(schedule, Arc::new(RecordingSink::default()), ms(1));
        assert_eq!(scheduler.tick_interval(), MIN_TICK);
    }
}
