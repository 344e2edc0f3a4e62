//! Debounced watcher for the rule document (hot-reload trigger).
//!
//! Watches the document's parent directory via the `notify` crate and
//! funnels events into a background thread. A burst of qualifying
//! events for the tracked file collapses into a single listener
//! notification: each event re-arms a trailing-edge debounce timer,
//! and the notification fires only after a quiet period.
//!
//! The thread's only blocking point is a bounded `recv_timeout`, so
//! `stop()` is observed within one poll interval and cancels any armed
//! timer without firing it.

use std::ffi::OsString;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use dynaprobe_core::{ProbeError, Result};

// ── Tunables ────────────────────────────────────────────────────────

/// Debounce delay and poll bound for the watch loop.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period after the last qualifying event before listeners
    /// are notified.
    pub debounce: Duration,
    /// Upper bound on one blocking wait; a stop request is observed
    /// within this interval.
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

// ── Debounce core ───────────────────────────────────────────────────

/// Trailing-edge debounce timer: the last event in a burst wins and
/// determines the notification time.
#[derive(Debug)]
pub struct Debouncer {
    debounce: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, deadline: None }
    }

    /// Arm or re-arm the timer from a qualifying event at `now`.
    pub fn record(&mut self, now: Instant) {
        self.deadline = Some(now + self.debounce);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// If the timer is armed and due at `now`, disarm it and report
    /// that the notification should fire.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel a pending notification without firing it.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Remaining wait until the armed deadline, if any.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(now))
    }
}

// ── Watcher ─────────────────────────────────────────────────────────

type WatchListener = Arc<dyn Fn() + Send + Sync>;

/// Monitors the rule document for changes and raises one debounced
/// notification per burst. `Stopped → Running → Stopped`; `stop()` is
/// idempotent.
pub struct ChangeWatcher {
    config_path: PathBuf,
    cfg: WatcherConfig,
    listeners: Arc<Mutex<Vec<WatchListener>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    /// Active notify watcher (held to keep it alive; dropped on stop).
    watcher: Option<RecommendedWatcher>,
}

impl ChangeWatcher {
    pub fn new(config_path: impl Into<PathBuf>, cfg: WatcherConfig) -> Self {
        Self {
            config_path: config_path.into(),
            cfg,
            listeners: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            watcher: None,
        }
    }

    /// Register a listener notified after each debounced change.
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .push(Arc::new(listener));
    }

    /// Start the background watch loop.
    ///
    /// The document's parent directory is watched non-recursively;
    /// only events for the tracked file name qualify.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ProbeError::WatcherState("watcher already running".to_string()));
        }

        let dir = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name: OsString = self
            .config_path
            .file_name()
            .ok_or_else(|| {
                ProbeError::WatcherState(format!(
                    "config path has no file name: {}",
                    self.config_path.display()
                ))
            })?
            .to_os_string();

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| ProbeError::Notify(e.to_string()))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| ProbeError::Notify(e.to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let listeners = Arc::clone(&self.listeners);
        let cfg = self.cfg.clone();
        let path = self.config_path.clone();

        self.worker = Some(std::thread::spawn(move || {
            watch_loop(rx, file_name, listeners, running, cfg);
        }));
        self.watcher = Some(watcher);

        info!(path = %path.display(), "change watcher started");
        Ok(())
    }

    /// Stop the watch loop, cancel any pending notification, and join
    /// the background thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        // Dropping the notify watcher closes the event channel; the
        // loop then observes disconnect or the cleared flag within one
        // poll interval.
        self.watcher = None;

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("change watcher thread panicked");
            }
            info!("change watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Watch loop ──────────────────────────────────────────────────────

fn watch_loop(
    rx: Receiver<notify::Result<Event>>,
    file_name: OsString,
    listeners: Arc<Mutex<Vec<WatchListener>>>,
    running: Arc<AtomicBool>,
    cfg: WatcherConfig,
) {
    let mut debouncer = Debouncer::new(cfg.debounce);

    loop {
        let wait = debouncer
            .time_until_due(Instant::now())
            .map(|remaining| remaining.min(cfg.poll_interval))
            .unwrap_or(cfg.poll_interval);

        match rx.recv_timeout(wait) {
            Ok(Ok(event)) => {
                if qualifies(&event, &file_name) {
                    debug!(kind = ?event.kind, "qualifying file event, arming debounce");
                    debouncer.record(Instant::now());
                }
            }
            Ok(Err(e)) => warn!(error = %e, "filesystem watcher error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // The watch primitive was dropped. A deliberate stop
                // exits cleanly; anything else is unexpected.
                if running.load(Ordering::SeqCst) {
                    error!("watch event channel closed unexpectedly");
                } else {
                    debug!("watch event channel closed, shutting down");
                }
                break;
            }
        }

        if !running.load(Ordering::SeqCst) {
            debouncer.disarm();
            break;
        }

        if debouncer.fire_due(Instant::now()) {
            info!("rule document changed, notifying listeners");
            notify_listeners(&listeners);
        }
    }

    info!("change watcher thread exiting");
}

/// Only create/modify events for the tracked file arm the debounce;
/// a removal is logged but does not trigger a reload.
fn qualifies(event: &Event, file_name: &OsString) -> bool {
    let for_tracked_file = event
        .paths
        .iter()
        .any(|p| p.file_name().map(|n| n == file_name.as_os_str()).unwrap_or(false));
    if !for_tracked_file {
        return false;
    }

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => true,
        EventKind::Remove(_) => {
            warn!("rule document removed");
            false
        }
        _ => {
            debug!(kind = ?event.kind, "ignoring event");
            false
        }
    }
}

/// Run listeners on a detached thread so notification never blocks the
/// debounce loop; each listener's failure is isolated.
fn notify_listeners(listeners: &Arc<Mutex<Vec<WatchListener>>>) {
    let snapshot: Vec<WatchListener> = listeners
        .lock()
        .expect("listeners lock poisoned")
        .clone();

    std::thread::spawn(move || {
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                error!("file change listener panicked");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    use tempfile::TempDir;

    use super::*;

    // ── Debouncer ───────────────────────────────────────────────

    #[test]
    fn debouncer_fires_after_quiet_period() {
        let mut d = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(!d.is_armed());
        assert!(!d.fire_due(t0));

        d.record(t0);
        assert!(d.is_armed());
        assert!(!d.fire_due(t0 + Duration::from_millis(50)));
        assert!(d.fire_due(t0 + Duration::from_millis(100)));
        // One-shot: firing disarms.
        assert!(!d.fire_due(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn debouncer_rearm_pushes_deadline() {
        let mut d = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        d.record(t0);
        d.record(t0 + Duration::from_millis(80));
        // Original deadline has passed, but the burst's last event wins.
        assert!(!d.fire_due(t0 + Duration::from_millis(120)));
        assert!(d.fire_due(t0 + Duration::from_millis(180)));
    }

    #[test]
    fn debouncer_disarm_cancels() {
        let mut d = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        d.record(t0);
        d.disarm();
        assert!(!d.is_armed());
        assert!(!d.fire_due(t0 + Duration::from_secs(1)));
        assert_eq!(d.time_until_due(t0), None);
    }

    #[test]
    fn debouncer_reports_remaining_wait() {
        let mut d = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        d.record(t0);
        assert_eq!(d.time_until_due(t0 + Duration::from_millis(40)), Some(Duration::from_millis(60)));
        // Past the deadline the remaining wait saturates at zero.
        assert_eq!(d.time_until_due(t0 + Duration::from_millis(150)), Some(Duration::ZERO));
    }

    // ── Filesystem integration ──────────────────────────────────

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(150),
            poll_interval: Duration::from_millis(50),
        }
    }

    fn counting_watcher(path: &Path) -> (ChangeWatcher, Arc<AtomicUsize>) {
        let watcher = ChangeWatcher::new(path, fast_config());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        watcher.add_listener(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (watcher, count)
    }

    #[test]
    fn burst_of_events_yields_one_notification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instrumentation.json");
        fs::write(&path, "{}").unwrap();

        let (mut watcher, count) = counting_watcher(&path);
        watcher.start().unwrap();

        for i in 0..4 {
            fs::write(&path, format!("{{\"n\": {}}}", i)).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(900));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        watcher.stop();
    }

    #[test]
    fn spaced_events_notify_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instrumentation.json");
        fs::write(&path, "{}").unwrap();

        let (mut watcher, count) = counting_watcher(&path);
        watcher.start().unwrap();

        fs::write(&path, "{\"n\": 1}").unwrap();
        std::thread::sleep(Duration::from_millis(700));
        fs::write(&path, "{\"n\": 2}").unwrap();
        std::thread::sleep(Duration::from_millis(700));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        watcher.stop();
    }

    #[test]
    fn events_for_other_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instrumentation.json");
        fs::write(&path, "{}").unwrap();

        let (mut watcher, count) = counting_watcher(&path);
        watcher.start().unwrap();

        fs::write(dir.path().join("unrelated.json"), "{}").unwrap();
        std::thread::sleep(Duration::from_millis(500));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        watcher.stop();
    }

    #[test]
    fn start_twice_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instrumentation.json");
        fs::write(&path, "{}").unwrap();

        let mut watcher = ChangeWatcher::new(&path, fast_config());
        watcher.start().unwrap();
        assert!(matches!(watcher.start(), Err(ProbeError::WatcherState(_))));
        watcher.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instrumentation.json");
        fs::write(&path, "{}").unwrap();

        let mut watcher = ChangeWatcher::new(&path, fast_config());
        watcher.stop(); // never started

        watcher.start().unwrap();
        assert!(watcher.is_running());
        watcher.stop();
        assert!(!watcher.is_running());
        watcher.stop();
    }
}
