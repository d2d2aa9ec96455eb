//! Filesystem watching for the monitored roots.
//!
//! The OS notification backend (via `notify`) delivers raw events on its own
//! thread. They are bridged into a single blocking task that runs the
//! [`ChangeDetector`], so line extraction for all files happens on one
//! logical pipeline and never waits on subscribers.
//!
//! Key behaviours:
//! - Only create/modify events for regular files under a monitored root are
//!   acted on
//! - Files that exist at startup are primed at their current size, so the
//!   backlog is never replayed
//! - Files created while running are read from their first byte
//! - Removed or renamed-away files stop being tracked

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::error::Error;
use crate::extractor::{LineExtractor, DEFAULT_MAX_READ_BYTES};

/// How often the bridge loop checks for a stop request while idle.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// FileChange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Other,
}

/// A single filesystem change, as seen by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub is_directory: bool,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            kind,
            is_directory,
        }
    }

    /// Split a `notify` event into one change per path.
    ///
    /// Renames are reported as the source path being removed; the
    /// destination is left for its first modify event to pick up.
    pub fn from_event(event: &Event) -> Vec<FileChange> {
        let kind_for = |index: usize, path: &Path| match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if index == 0 => {
                ChangeKind::Removed
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)) if !path.exists() => {
                ChangeKind::Removed
            }
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Other,
            EventKind::Modify(ModifyKind::Metadata(_)) => ChangeKind::Other,
            EventKind::Modify(_) => ChangeKind::Modified,
            _ => ChangeKind::Other,
        };

        event
            .paths
            .iter()
            .enumerate()
            .map(|(index, path)| FileChange {
                path: path.clone(),
                kind: kind_for(index, path),
                is_directory: path.is_dir(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MonitoredPaths
// ---------------------------------------------------------------------------

/// The set of root directories (or single files) being tailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredPaths {
    roots: Vec<PathBuf>,
}

impl MonitoredPaths {
    /// Resolve each root to an absolute, canonical path.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoPaths` for an empty list and `Error::PathNotFound`
    /// for a root that does not exist.
    pub fn new<I, P>(roots: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut resolved = Vec::new();
        for root in roots {
            let root = root.as_ref();
            let canonical = root
                .canonicalize()
                .map_err(|_| Error::PathNotFound(root.to_path_buf()))?;
            if !resolved.contains(&canonical) {
                resolved.push(canonical);
            }
        }
        if resolved.is_empty() {
            return Err(Error::NoPaths);
        }
        Ok(Self { roots: resolved })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Whether `path` lies under one of the roots.
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Every regular file currently under the roots.
    ///
    /// Unreadable directories are skipped with a warning.
    pub fn scan_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.roots {
            if root.is_file() {
                files.push(root.clone());
            } else {
                collect_files(root, &mut files);
            }
        }
        files
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "could not read directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => collect_files(&path, files),
            Ok(ft) if ft.is_file() => files.push(path),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeDetector
// ---------------------------------------------------------------------------

/// Filters filesystem changes and publishes the lines they reveal.
///
/// The extractor (and with it every file offset) sits behind one lock, so
/// concurrent calls for the same file cannot read the same bytes twice.
#[derive(Debug)]
pub struct ChangeDetector {
    paths: MonitoredPaths,
    extractor: Mutex<LineExtractor>,
    broadcaster: Broadcaster,
}

impl ChangeDetector {
    pub fn new(paths: MonitoredPaths, extractor: LineExtractor, broadcaster: Broadcaster) -> Self {
        Self {
            paths,
            extractor: Mutex::new(extractor),
            broadcaster,
        }
    }

    pub fn paths(&self) -> &MonitoredPaths {
        &self.paths
    }

    fn extractor(&self) -> MutexGuard<'_, LineExtractor> {
        self.extractor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking every existing file at its current size. Returns the
    /// number of files primed.
    pub fn prime_existing(&self) -> usize {
        let mut extractor = self.extractor();
        let mut primed = 0;
        for path in self.paths.scan_files() {
            match extractor.prime(&path) {
                Ok(_) => primed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not stat file"),
            }
        }
        primed
    }

    /// Handle one change. Returns the number of records published.
    pub fn on_file_changed(&self, change: &FileChange) -> usize {
        if change.is_directory || !self.paths.contains(&change.path) {
            return 0;
        }

        let path = change.path.as_path();
        let mut extractor = self.extractor();
        match change.kind {
            ChangeKind::Created => extractor.track_created(path),
            ChangeKind::Modified => {}
            ChangeKind::Removed => {
                if extractor.forget(path).is_some() {
                    debug!(path = %path.display(), "stopped tracking removed file");
                }
                return 0;
            }
            ChangeKind::Other => return 0,
        }

        let records = match extractor.extract_new(path) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "stopped tracking file");
                return 0;
            }
        };
        // Publishing under the extractor lock keeps per-file order intact
        // when changes for the same file are handled concurrently.
        let count = records.len();
        for record in records {
            self.broadcaster.publish(record);
        }
        if count > 0 {
            debug!(path = %path.display(), lines = count, "published new lines");
        }
        count
    }

    /// Handle every path of a raw `notify` event.
    pub fn handle_event(&self, event: &Event) -> usize {
        FileChange::from_event(event)
            .iter()
            .map(|change| self.on_file_changed(change))
            .sum()
    }

    pub fn tracked_files(&self) -> usize {
        self.extractor().tracker().len()
    }
}

// ---------------------------------------------------------------------------
// TailService
// ---------------------------------------------------------------------------

/// Settings for [`TailService::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailOptions {
    pub paths: Vec<PathBuf>,
    pub max_read_bytes: u64,
    pub skip_blank_lines: bool,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("logs")],
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            skip_blank_lines: false,
        }
    }
}

/// Owns the filesystem watcher, the change detector and the broadcaster.
///
/// Created by [`start`](Self::start) and shut down with
/// [`stop`](Self::stop). Sessions get at the feed through
/// [`broadcaster`](Self::broadcaster).
#[derive(Debug)]
pub struct TailService {
    broadcaster: Broadcaster,
    detector: Arc<ChangeDetector>,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TailService {
    /// Prime existing files, register recursive watches on every root and
    /// start the event loop. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if a root does not exist or the watcher cannot be created or
    /// registered.
    pub fn start(options: &TailOptions, broadcaster: Broadcaster) -> Result<Self, Error> {
        let paths = MonitoredPaths::new(&options.paths)?;
        let extractor = LineExtractor::new()
            .with_max_read_bytes(options.max_read_bytes)
            .with_skip_blank_lines(options.skip_blank_lines);
        let detector = Arc::new(ChangeDetector::new(paths, extractor, broadcaster.clone()));

        let primed = detector.prime_existing();

        let (notify_tx, notify_rx) = std::sync::mpsc::channel::<Result<Event, notify::Error>>();
        let mut watcher = notify::RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let _ = notify_tx.send(res);
            },
            notify::Config::default(),
        )?;
        for root in detector.paths().roots() {
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!(path = %root.display(), "watching");
        }
        info!(files = primed, "tracking existing files from their current size");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let loop_detector = Arc::clone(&detector);

        let handle = tokio::task::spawn_blocking(move || {
            // Keep the watcher alive for the lifetime of this task
            let _watcher = watcher;
            loop {
                match notify_rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                    Ok(Ok(event)) => {
                        loop_detector.handle_event(&event);
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "filesystem watcher error");
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
            }
            debug!("watch loop finished");
        });

        Ok(Self {
            broadcaster,
            detector,
            shutdown,
            handle,
        })
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    /// Stop watching and wait for the event loop to exit.
    pub async fn stop(self) {
        info!("stopping file monitoring");
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "watch loop did not exit cleanly");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::SubscriberChannel;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn drain(channel: &mut SubscriberChannel) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(r) = channel.try_recv() {
            out.push(r.to_string());
        }
        out
    }

    /// Detector over a fresh temp root, plus a subscriber attached to it.
    fn detector_for(tmp: &TempDir) -> (ChangeDetector, SubscriberChannel, PathBuf) {
        let root = tmp.path().canonicalize().unwrap();
        let broadcaster = Broadcaster::new();
        let channel = broadcaster.subscribe();
        let paths = MonitoredPaths::new([&root]).unwrap();
        let detector = ChangeDetector::new(paths, LineExtractor::new(), broadcaster);
        (detector, channel, root)
    }

    // -- FileChange conversion -------------------------------------------------

    #[test]
    fn test_from_event_kinds() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.log");
        std::fs::write(&file, "").unwrap();

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone());
        assert_eq!(
            FileChange::from_event(&created),
            vec![FileChange::new(&file, ChangeKind::Created, false)]
        );

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(file.clone());
        assert_eq!(FileChange::from_event(&modified)[0].kind, ChangeKind::Modified);

        let metadata = Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )))
        .add_path(file.clone());
        assert_eq!(FileChange::from_event(&metadata)[0].kind, ChangeKind::Other);

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(file.clone());
        assert_eq!(FileChange::from_event(&removed)[0].kind, ChangeKind::Removed);

        let dir_event =
            Event::new(EventKind::Create(CreateKind::Folder)).add_path(tmp.path().to_path_buf());
        assert!(FileChange::from_event(&dir_event)[0].is_directory);
    }

    #[test]
    fn test_from_event_rename_both() {
        let from = PathBuf::from("/logs/app.log");
        let to = PathBuf::from("/logs/app.log.1");
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());

        let changes = FileChange::from_event(&event);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert_eq!(changes[0].path, from);
        assert_eq!(changes[1].kind, ChangeKind::Other);
        assert_eq!(changes[1].path, to);
    }

    // -- MonitoredPaths --------------------------------------------------------

    #[test]
    fn test_monitored_paths_missing_root() {
        let err = MonitoredPaths::new(["/definitely/not/here/logcast"]).unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));
    }

    #[test]
    fn test_monitored_paths_empty() {
        let err = MonitoredPaths::new(Vec::<PathBuf>::new()).unwrap_err();
        assert!(matches!(err, Error::NoPaths));
    }

    #[test]
    fn test_monitored_paths_contains_by_component() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        let logs2 = tmp.path().join("logs2");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::create_dir_all(&logs2).unwrap();

        let paths = MonitoredPaths::new([&logs, &logs]).unwrap();
        assert_eq!(paths.roots().len(), 1);

        let root = logs.canonicalize().unwrap();
        assert!(paths.contains(&root.join("app.log")));
        assert!(paths.contains(&root.join("nested/deep.log")));
        assert!(!paths.contains(&logs2.canonicalize().unwrap().join("app.log")));
    }

    #[test]
    fn test_scan_files_recurses() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        std::fs::write(tmp.path().join("top.log"), "x\n").unwrap();
        std::fs::write(tmp.path().join("a/b/deep.log"), "y\n").unwrap();

        let paths = MonitoredPaths::new([tmp.path()]).unwrap();
        let mut names: Vec<_> = paths
            .scan_files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["deep.log", "top.log"]);
    }

    // -- ChangeDetector --------------------------------------------------------

    #[test]
    fn test_created_file_is_read_from_start() {
        let tmp = TempDir::new().unwrap();
        let (detector, mut channel, root) = detector_for(&tmp);
        let path = root.join("new.log");
        std::fs::write(&path, "first\nsecond\n").unwrap();

        let published =
            detector.on_file_changed(&FileChange::new(&path, ChangeKind::Created, false));
        assert_eq!(published, 2);
        assert_eq!(drain(&mut channel), ["[new.log] first", "[new.log] second"]);
    }

    #[test]
    fn test_primed_file_skips_backlog() {
        let tmp = TempDir::new().unwrap();
        let (detector, mut channel, root) = detector_for(&tmp);
        let path = root.join("app.log");
        std::fs::write(&path, "Initial log entry.\n").unwrap();

        assert_eq!(detector.prime_existing(), 1);
        append(&path, "hello\n");
        detector.on_file_changed(&FileChange::new(&path, ChangeKind::Modified, false));
        assert_eq!(drain(&mut channel), ["[app.log] hello"]);
    }

    #[test]
    fn test_redundant_events_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (detector, mut channel, root) = detector_for(&tmp);
        let path = root.join("app.log");
        std::fs::write(&path, "").unwrap();
        detector.prime_existing();

        append(&path, "once\n");
        let change = FileChange::new(&path, ChangeKind::Modified, false);
        assert_eq!(detector.on_file_changed(&change), 1);
        assert_eq!(detector.on_file_changed(&change), 0);
        assert_eq!(detector.on_file_changed(&change), 0);
        assert_eq!(drain(&mut channel), ["[app.log] once"]);
    }

    #[test]
    fn test_ignores_directories_and_foreign_paths() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let (detector, mut channel, root) = detector_for(&tmp);

        let foreign = other.path().join("elsewhere.log");
        std::fs::write(&foreign, "should not appear\n").unwrap();
        let dir = root.join("subdir");
        std::fs::create_dir(&dir).unwrap();

        assert_eq!(
            detector.on_file_changed(&FileChange::new(&foreign, ChangeKind::Created, false)),
            0
        );
        assert_eq!(
            detector.on_file_changed(&FileChange::new(&dir, ChangeKind::Created, true)),
            0
        );
        assert!(drain(&mut channel).is_empty());
        assert_eq!(detector.tracked_files(), 0);
    }

    #[test]
    fn test_removed_file_is_forgotten() {
        let tmp = TempDir::new().unwrap();
        let (detector, _channel, root) = detector_for(&tmp);
        let path = root.join("app.log");
        std::fs::write(&path, "x\n").unwrap();
        detector.prime_existing();
        assert_eq!(detector.tracked_files(), 1);

        std::fs::remove_file(&path).unwrap();
        detector.on_file_changed(&FileChange::new(&path, ChangeKind::Removed, false));
        assert_eq!(detector.tracked_files(), 0);
    }

    #[test]
    fn test_io_error_is_contained() {
        let tmp = TempDir::new().unwrap();
        let (detector, mut channel, root) = detector_for(&tmp);
        let gone = root.join("gone.log");
        let alive = root.join("alive.log");
        std::fs::write(&alive, "").unwrap();
        detector.prime_existing();

        // Modify event for a file that no longer exists: warning only
        assert_eq!(
            detector.on_file_changed(&FileChange::new(&gone, ChangeKind::Modified, false)),
            0
        );

        append(&alive, "still flowing\n");
        detector.on_file_changed(&FileChange::new(&alive, ChangeKind::Modified, false));
        assert_eq!(drain(&mut channel), ["[alive.log] still flowing"]);
    }

    #[test]
    fn test_rotation_by_rename() {
        let tmp = TempDir::new().unwrap();
        let (detector, mut channel, root) = detector_for(&tmp);
        let path = root.join("app.log");
        let rotated = root.join("app.log.1");
        std::fs::write(&path, "").unwrap();
        detector.prime_existing();

        append(&path, "before\n");
        detector.on_file_changed(&FileChange::new(&path, ChangeKind::Modified, false));

        std::fs::rename(&path, &rotated).unwrap();
        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path.clone())
            .add_path(rotated.clone());
        detector.handle_event(&rename);

        std::fs::write(&path, "after\n").unwrap();
        detector.on_file_changed(&FileChange::new(&path, ChangeKind::Created, false));

        assert_eq!(drain(&mut channel), ["[app.log] before", "[app.log] after"]);
    }

    // -- TailService -----------------------------------------------------------

    #[tokio::test]
    async fn test_service_start_missing_root_fails() {
        let options = TailOptions {
            paths: vec![PathBuf::from("/definitely/not/here/logcast")],
            ..TailOptions::default()
        };
        let result = TailService::start(&options, Broadcaster::new());
        assert!(matches!(result, Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_service_start_and_stop() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("app.log"), "old\n").unwrap();
        let options = TailOptions {
            paths: vec![tmp.path().to_path_buf()],
            ..TailOptions::default()
        };

        let service = TailService::start(&options, Broadcaster::new()).unwrap();
        assert_eq!(service.detector().tracked_files(), 1);
        tokio::time::timeout(Duration::from_secs(5), service.stop())
            .await
            .expect("service did not stop");
    }
}
