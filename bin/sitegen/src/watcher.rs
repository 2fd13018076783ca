//! Source tree watching with debounced rebuilds.
//!
//! A [`ChangeDetector`] reports whether anything changed since it last looked;
//! the [`Debouncer`] turns those reports into rebuild decisions:
//!
//! ```text
//! Idle --change--> Pending --change--> Pending (deadline reset)
//!                  Pending --deadline passed--> Rebuilding --done--> Idle
//! ```

use std::{
    collections::BTreeMap,
    fs::Metadata,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::{Duration, Instant, SystemTime},
};

use color_eyre::eyre::{Result, WrapErr, bail};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sitegen_core::{DetectorKind, LayoutConfig, WatchConfig, pathsafe};
use walkdir::WalkDir;

use crate::shutdown::Shutdown;

/// Source of "something changed" signals.
pub trait ChangeDetector: Send {
    /// Whether the tree changed since the previous call or [`reset`](Self::reset).
    fn detect(&mut self) -> Result<bool>;

    /// Forget pending changes and take the current tree as the baseline.
    fn reset(&mut self) -> Result<()>;
}

/// Open the detector selected in the configuration.
pub fn open_detector(
    kind: DetectorKind,
    root: &Path,
    layout: &LayoutConfig,
) -> Result<Box<dyn ChangeDetector>> {
    Ok(match kind {
        DetectorKind::Poll => Box::new(PollingDetector::new(root, layout.clone())?),
        DetectorKind::Notify => Box::new(NotifyDetector::new(root, layout.clone())?),
    })
}

fn watch_root(root: &Path) -> Result<PathBuf> {
    let absolute = pathsafe::absolutize(root)
        .wrap_err_with(|| format!("failed to resolve watch root {}", root.display()))?;
    let metadata = std::fs::metadata(&absolute)
        .wrap_err_with(|| format!("failed to stat watch root {}", absolute.display()))?;
    if !metadata.is_dir() {
        bail!("watch root is not a directory: {}", root.display());
    }
    Ok(absolute)
}

/// What the polling detector remembers about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub modified: Option<SystemTime>,
    pub len: u64,
    pub mode: u32,
}

impl From<&Metadata> for FileState {
    fn from(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = u32::from(metadata.permissions().readonly());

        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            mode,
        }
    }
}

/// Slash-separated relative path to file state.
pub type Snapshot = BTreeMap<String, FileState>;

/// Record every non-ignored file under `root`.
pub fn collect_snapshot(root: &Path, layout: &LayoutConfig) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !layout.is_ignored(&entry.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.wrap_err("failed to walk watch root")?;
        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = entry
            .metadata()
            .wrap_err_with(|| format!("failed to stat {}", entry.path().display()))?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        snapshot.insert(key, FileState::from(&metadata));
    }

    Ok(snapshot)
}

/// Detects changes by diffing periodic snapshots of the tree.
#[derive(Debug)]
pub struct PollingDetector {
    root: PathBuf,
    layout: LayoutConfig,
    last: Snapshot,
}

impl PollingDetector {
    /// Take the initial snapshot of `root`.
    pub fn new(root: &Path, layout: LayoutConfig) -> Result<Self> {
        let root = watch_root(root)?;
        let last = collect_snapshot(&root, &layout)?;
        tracing::debug!(root = %root.display(), files = last.len(), "polling watcher ready");
        Ok(Self { root, layout, last })
    }
}

impl ChangeDetector for PollingDetector {
    fn detect(&mut self) -> Result<bool> {
        let current = collect_snapshot(&self.root, &self.layout)?;
        if current == self.last {
            return Ok(false);
        }
        self.last = current;
        Ok(true)
    }

    fn reset(&mut self) -> Result<()> {
        self.last = collect_snapshot(&self.root, &self.layout)?;
        Ok(())
    }
}

/// Detects changes from OS file events.
pub struct NotifyDetector {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
    layout: LayoutConfig,
}

impl NotifyDetector {
    /// Start watching `root` recursively.
    pub fn new(root: &Path, layout: LayoutConfig) -> Result<Self> {
        let root = watch_root(root)?;
        let (tx, events) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(tx).wrap_err("failed to create file watcher")?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .wrap_err_with(|| format!("failed to watch {}", root.display()))?;
        tracing::debug!(root = %root.display(), "notify watcher ready");

        Ok(Self {
            _watcher: watcher,
            events,
            layout,
        })
    }

    fn is_relevant(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event.paths.iter().any(|path| {
            !path
                .file_name()
                .is_some_and(|name| self.layout.is_ignored(&name.to_string_lossy()))
        })
    }
}

impl ChangeDetector for NotifyDetector {
    fn detect(&mut self) -> Result<bool> {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                Ok(event) if self.is_relevant(&event) => changed = true,
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "file watcher error"),
            }
        }
        Ok(changed)
    }

    fn reset(&mut self) -> Result<()> {
        while self.events.try_recv().is_ok() {}
        Ok(())
    }
}

/// Debounce state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Pending { due: Instant },
    Rebuilding,
}

/// Collapses bursts of changes into one rebuild.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    state: WatchState,
}

impl Debouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: WatchState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Feed one detection result. Returns `true` when a rebuild should start;
    /// the caller must call [`finish`](Self::finish) once it is done.
    pub fn observe(&mut self, changed: bool, now: Instant) -> bool {
        match self.state {
            WatchState::Rebuilding => return false,
            WatchState::Idle | WatchState::Pending { .. } if changed => {
                self.state = WatchState::Pending {
                    due: now + self.delay,
                };
            }
            _ => {}
        }

        match self.state {
            WatchState::Pending { due } if now >= due => {
                self.state = WatchState::Rebuilding;
                true
            }
            _ => false,
        }
    }

    /// Return to idle after a rebuild, successful or not.
    pub fn finish(&mut self) {
        self.state = WatchState::Idle;
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Poll `detector` until `shutdown` fires, calling `rebuild` after each
/// debounced burst of changes.
///
/// Rebuild errors are reported and watching continues; detector errors end
/// the loop.
pub fn run<F>(
    detector: &mut dyn ChangeDetector,
    config: &WatchConfig,
    shutdown: &Shutdown,
    mut rebuild: F,
) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let interval = config.interval();
    let mut debouncer = Debouncer::new(config.debounce());

    tracing::info!(
        interval_ms = millis(interval),
        debounce_ms = millis(config.debounce()),
        "watching for changes"
    );

    loop {
        thread::sleep(interval);
        if shutdown.is_cancelled() {
            break;
        }

        let changed = detector.detect()?;
        if changed {
            tracing::debug!("change detected, waiting for debounce");
        }

        if debouncer.observe(changed, Instant::now()) {
            println!("  Change detected, rebuilding...");
            if let Err(err) = rebuild() {
                tracing::error!(error = ?err, "rebuild failed");
                eprintln!("  ✗ Rebuild failed: {err:#}");
            }
            detector.reset()?;
            debouncer.finish();
        }
    }

    tracing::info!("watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, fs};

    use color_eyre::eyre::eyre;
    use tempfile::TempDir;

    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Replays a fixed sequence of detection results, then reports no change.
    struct Scripted {
        changes: VecDeque<bool>,
        resets: usize,
    }

    impl Scripted {
        fn new(changes: &[bool]) -> Self {
            Self {
                changes: changes.iter().copied().collect(),
                resets: 0,
            }
        }
    }

    impl ChangeDetector for Scripted {
        fn detect(&mut self) -> Result<bool> {
            Ok(self.changes.pop_front().unwrap_or(false))
        }

        fn reset(&mut self) -> Result<()> {
            self.resets += 1;
            Ok(())
        }
    }

    fn fast_config() -> WatchConfig {
        WatchConfig {
            interval_ms: 5,
            debounce_ms: 10,
            ..WatchConfig::default()
        }
    }

    #[test]
    fn test_debouncer_transitions() {
        let start = Instant::now();
        let delay = Duration::from_millis(200);
        let mut debouncer = Debouncer::new(delay);
        assert_eq!(debouncer.state(), WatchState::Idle);

        assert!(!debouncer.observe(false, start));
        assert_eq!(debouncer.state(), WatchState::Idle);

        assert!(!debouncer.observe(true, start));
        assert_eq!(debouncer.state(), WatchState::Pending { due: start + delay });

        // A further change pushes the deadline out.
        let later = start + Duration::from_millis(150);
        assert!(!debouncer.observe(true, later));
        assert_eq!(debouncer.state(), WatchState::Pending { due: later + delay });

        assert!(!debouncer.observe(false, start + delay));
        assert!(debouncer.observe(false, later + delay));
        assert_eq!(debouncer.state(), WatchState::Rebuilding);

        // Changes while rebuilding are left to the detector reset.
        assert!(!debouncer.observe(true, later + delay * 3));
        assert_eq!(debouncer.state(), WatchState::Rebuilding);

        debouncer.finish();
        assert_eq!(debouncer.state(), WatchState::Idle);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_debouncer_zero_delay_fires_immediately() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        assert!(debouncer.observe(true, Instant::now()));
    }

    #[test]
    fn test_snapshot_ignores_metadata() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("index.html"), "home");
        write(&dir.path().join("css/site.css"), "body{}");
        write(&dir.path().join(".DS_Store"), "junk");
        write(&dir.path().join("css/._site.css"), "junk");

        let snapshot = collect_snapshot(dir.path(), &LayoutConfig::default()).unwrap();
        let keys: Vec<_> = snapshot.keys().cloned().collect();

        assert_eq!(keys, ["css/site.css", "index.html"]);
        assert_eq!(snapshot["index.html"].len, 4);
    }

    #[test]
    fn test_polling_detector_sees_changes() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("index.html"), "home");

        let mut detector = PollingDetector::new(dir.path(), LayoutConfig::default()).unwrap();
        assert!(!detector.detect().unwrap());

        write(&dir.path().join("index.html"), "home, longer");
        assert!(detector.detect().unwrap());
        assert!(!detector.detect().unwrap());

        write(&dir.path().join("new.html"), "new");
        assert!(detector.detect().unwrap());

        fs::remove_file(dir.path().join("new.html")).unwrap();
        assert!(detector.detect().unwrap());

        write(&dir.path().join("Thumbs.db"), "junk");
        assert!(!detector.detect().unwrap());
    }

    #[test]
    fn test_polling_detector_reset_rebaselines() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("a.txt"), "a");

        let mut detector = PollingDetector::new(dir.path(), LayoutConfig::default()).unwrap();
        write(&dir.path().join("b.txt"), "b");
        detector.reset().unwrap();

        assert!(!detector.detect().unwrap());
    }

    #[test]
    fn test_polling_detector_requires_directory() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("file.txt"), "x");

        assert!(PollingDetector::new(&dir.path().join("missing"), LayoutConfig::default()).is_err());
        assert!(PollingDetector::new(&dir.path().join("file.txt"), LayoutConfig::default()).is_err());
    }

    #[test]
    fn test_run_rebuilds_once_per_burst() {
        let mut detector = Scripted::new(&[true, true, true]);
        let (trigger, shutdown) = Shutdown::channel();
        let mut rebuilds = 0;

        run(&mut detector, &fast_config(), &shutdown, || {
            rebuilds += 1;
            trigger.trigger();
            Ok(())
        })
        .unwrap();

        assert_eq!(rebuilds, 1);
        assert_eq!(detector.resets, 1);
    }

    #[test]
    fn test_run_continues_after_rebuild_error() {
        let mut detector = Scripted::new(&[true, false, false, false, false, true]);
        let (trigger, shutdown) = Shutdown::channel();
        let mut attempts = 0;

        run(&mut detector, &fast_config(), &shutdown, || {
            attempts += 1;
            if attempts == 1 {
                return Err(eyre!("broken template"));
            }
            trigger.trigger();
            Ok(())
        })
        .unwrap();

        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_run_stops_when_cancelled() {
        let mut detector = Scripted::new(&[]);
        let (trigger, shutdown) = Shutdown::channel();
        trigger.trigger();

        run(&mut detector, &fast_config(), &shutdown, || {
            panic!("no rebuild expected");
        })
        .unwrap();
    }
}
