//! Live file-system monitoring of the LoRA roots.
//!
//! The notify callback runs on a foreign thread. It only classifies events,
//! drops the ones we caused ourselves (see [`IgnoreList`]) and forwards
//! [`FileChange`]s into a bounded channel. A tokio task owns the pending
//! batch, waits out the debounce window and hands the batch to
//! [`LoraScanner::apply_file_changes`].

use super::files::{is_model_file, normalize_path};
use super::scanner::LoraScanner;
use crate::config::{LibrarySettings, WatcherConfig};
use crate::error::{LoraError, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    Add,
    Remove,
}

/// One debounced unit of work for the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub action: FileAction,
    /// Literal (root-relative, non-resolved) path with forward slashes.
    pub path: String,
}

impl FileChange {
    pub fn add(path: impl Into<String>) -> Self {
        Self {
            action: FileAction::Add,
            path: path.into(),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            action: FileAction::Remove,
            path: path.into(),
        }
    }
}

/// Resolve symlinks. Paths that don't exist yet resolve through their parent.
pub fn real_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Real paths whose events are suppressed until a deadline.
///
/// Shared between the scanner (which registers its own moves and deletes)
/// and the notify callback.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl IgnoreList {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to suppress events for a file of `size` bytes.
    pub fn timeout_for(size: u64) -> Duration {
        let secs = size as f64 / WatcherConfig::ASSUMED_BYTES_PER_SEC as f64
            * WatcherConfig::IGNORE_TIMEOUT_FACTOR;
        Duration::from_secs_f64(secs).max(WatcherConfig::MIN_IGNORE_TIMEOUT)
    }

    pub fn add(&self, path: &Path, size: u64) {
        self.add_for(path, Self::timeout_for(size));
    }

    pub fn add_for(&self, path: &Path, timeout: Duration) {
        let key = normalize_path(real_path(path));
        debug!("Adding {} to ignore list for {:.1} seconds", key, timeout.as_secs_f64());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Instant::now() + timeout);
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        let key = normalize_path(real_path(path));
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, expiry| *expiry > now);
        entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, expiry| *expiry > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps real (resolved) paths reported by the OS back to the literal paths
/// the scanner indexes them under.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    /// `(real prefix, literal prefix)` pairs.
    mappings: Vec<(PathBuf, PathBuf)>,
}

impl PathMapper {
    /// Map every root and every symlinked directory found inside the roots.
    pub fn discover(roots: &[PathBuf]) -> Self {
        let mut mapper = Self::default();
        for root in roots {
            match root.canonicalize() {
                Ok(real) => mapper.insert(real, root.clone()),
                Err(e) => warn!("Cannot resolve root {}: {}", root.display(), e),
            }
            mapper.discover_links(root);
        }
        mapper
    }

    fn discover_links(&mut self, root: &Path) {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return false;
                }
                match entry.path().canonicalize() {
                    Ok(real) => visited.insert(real),
                    Err(_) => false,
                }
            });

        for entry in walker {
            match entry {
                Ok(entry) if entry.path_is_symlink() => match entry.path().canonicalize() {
                    Ok(target) => self.insert(target, entry.path().to_path_buf()),
                    Err(e) => debug!("Skipping broken link {}: {}", entry.path().display(), e),
                },
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable entry while mapping links: {}", e),
            }
        }
    }

    fn insert(&mut self, real: PathBuf, literal: PathBuf) {
        if !self.mappings.iter().any(|(r, _)| *r == real) {
            self.mappings.push((real, literal));
        }
    }

    /// Real directories that need their own OS watch.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        self.mappings.iter().map(|(real, _)| real.clone()).collect()
    }

    /// Rewrite `real` onto the literal prefix with the longest matching real prefix.
    pub fn map_to_literal(&self, real: &Path) -> PathBuf {
        self.mappings
            .iter()
            .filter_map(|(prefix, literal)| {
                real.strip_prefix(prefix)
                    .ok()
                    .map(|rest| (prefix.components().count(), literal.join(rest)))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, mapped)| mapped)
            .unwrap_or_else(|| real.to_path_buf())
    }
}

/// Turn one notify event into add/remove actions on model files.
pub fn classify_event(event: &Event) -> Vec<(FileAction, PathBuf)> {
    let mut actions = Vec::new();
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                actions.push((FileAction::Add, path.clone()));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                actions.push((FileAction::Remove, path.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                actions.push((FileAction::Remove, path.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                actions.push((FileAction::Add, path.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to, ..] = event.paths.as_slice() {
                actions.push((FileAction::Remove, from.clone()));
                actions.push((FileAction::Add, to.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Platforms that can't tell the two halves of a rename apart.
            for path in &event.paths {
                let action = if path.exists() {
                    FileAction::Add
                } else {
                    FileAction::Remove
                };
                actions.push((action, path.clone()));
            }
        }
        _ => {}
    }

    actions.retain(|(action, path)| {
        is_model_file(path) && !(*action == FileAction::Add && path.is_dir())
    });
    actions
}

/// Consume changes, coalescing everything that arrives within `delay` of the
/// first change into one batch. Ends when every sender is dropped.
pub fn spawn_debouncer(
    scanner: Arc<LoraScanner>,
    mut rx: mpsc::Receiver<FileChange>,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut pending: HashMap<String, FileAction> = HashMap::new();
            pending.insert(first.path, first.action);

            let deadline = tokio::time::Instant::now() + delay;
            let mut closed = false;
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(change)) => {
                        pending.insert(change.path, change.action);
                    }
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            let changes: Vec<FileChange> = pending
                .into_iter()
                .map(|(path, action)| FileChange { action, path })
                .collect();
            info!("Processing {} file changes", changes.len());
            if let Err(e) = scanner.apply_file_changes(changes).await {
                error!("Error applying file changes: {}", e);
            }

            if closed {
                break;
            }
        }
        debug!("File change consumer stopped");
    })
}

/// Keeps the scanner's cache in step with the directories it indexes.
pub struct FileMonitor {
    watcher: Mutex<Option<RecommendedWatcher>>,
    mapper: Arc<RwLock<PathMapper>>,
    roots: Vec<PathBuf>,
    watched: Mutex<HashSet<PathBuf>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl FileMonitor {
    /// Start watching every root of `settings`. Must be called inside a tokio runtime.
    pub fn start(scanner: Arc<LoraScanner>, settings: &LibrarySettings) -> Result<Self> {
        let roots = settings.lora_roots.clone();
        let mapper = Arc::new(RwLock::new(PathMapper::discover(&roots)));
        let ignore = scanner.ignore_list().clone();

        let (tx, rx) = mpsc::channel::<FileChange>(WatcherConfig::CHANNEL_CAPACITY);
        let callback_mapper = Arc::clone(&mapper);
        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for (action, path) in classify_event(&event) {
                        if ignore.should_ignore(&path) {
                            debug!("Ignoring self-inflicted event for {}", path.display());
                            continue;
                        }
                        let literal = callback_mapper
                            .read()
                            .unwrap_or_else(PoisonError::into_inner)
                            .map_to_literal(&path);
                        let change = FileChange {
                            action,
                            path: normalize_path(literal),
                        };
                        info!("LoRA file {:?}: {}", change.action, change.path);
                        if tx.blocking_send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| LoraError::Watcher {
            message: format!("Failed to create file watcher: {}", e),
        })?;

        let consumer = spawn_debouncer(scanner, rx, settings.debounce_delay());

        let monitor = Self {
            watcher: Mutex::new(Some(watcher)),
            mapper,
            roots,
            watched: Mutex::new(HashSet::new()),
            consumer: Mutex::new(Some(consumer)),
        };
        let added = monitor.watch_new_paths();
        info!("File monitor started with {} watched paths", added);
        Ok(monitor)
    }

    fn watch_new_paths(&self) -> usize {
        let paths = self
            .mapper
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .watch_paths();
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(watcher) = guard.as_mut() else {
            return 0;
        };
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);

        let mut added = 0;
        for path in paths {
            if watched.contains(&path) {
                continue;
            }
            match watcher.watch(&path, RecursiveMode::Recursive) {
                Ok(()) => {
                    info!("Started monitoring: {}", path.display());
                    watched.insert(path);
                    added += 1;
                }
                Err(e) => error!("Error monitoring {}: {}", path.display(), e),
            }
        }
        added
    }

    /// Pick up symlinked directories created since the monitor started.
    pub fn rescan_links(&self) -> usize {
        let fresh = PathMapper::discover(&self.roots);
        *self.mapper.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        self.watch_new_paths()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Drop the OS watcher. The consumer flushes what it has and exits.
    pub fn stop(&self) {
        if self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("File monitor stopped");
        }
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Wait for the consumer to drain after [`FileMonitor::stop`].
    pub async fn join(&self) {
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_classify_create_remove() {
        let created = classify_event(&event(
            EventKind::Create(CreateKind::File),
            &["/l/a.safetensors", "/l/a.png"],
        ));
        assert_eq!(created, vec![(FileAction::Add, PathBuf::from("/l/a.safetensors"))]);

        let removed = classify_event(&event(
            EventKind::Remove(RemoveKind::File),
            &["/l/b.safetensors"],
        ));
        assert_eq!(removed, vec![(FileAction::Remove, PathBuf::from("/l/b.safetensors"))]);
    }

    #[test]
    fn test_classify_rename_both() {
        let renamed = classify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/l/old.safetensors", "/l/new.safetensors"],
        ));
        assert_eq!(
            renamed,
            vec![
                (FileAction::Remove, PathBuf::from("/l/old.safetensors")),
                (FileAction::Add, PathBuf::from("/l/new.safetensors")),
            ]
        );
    }

    #[test]
    fn test_classify_ignores_data_changes() {
        let modified = classify_event(&event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            &["/l/a.safetensors"],
        ));
        assert!(modified.is_empty());
    }

    #[test]
    fn test_ignore_timeout_scales_with_size() {
        assert_eq!(IgnoreList::timeout_for(0), WatcherConfig::MIN_IGNORE_TIMEOUT);
        let big = IgnoreList::timeout_for(100 * 1024 * 1024);
        assert_eq!(big, Duration::from_secs(150));
    }

    #[test]
    fn test_ignore_list_expires() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.safetensors");
        let ignore = IgnoreList::new();

        ignore.add_for(&path, Duration::from_secs(60));
        assert!(ignore.should_ignore(&path));

        ignore.add_for(&path, Duration::from_millis(0));
        assert!(!ignore.should_ignore(&path));
        assert!(ignore.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_path_mapper_maps_link_targets_back() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("loras");
        let external = temp_dir.path().join("external");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&external).unwrap();
        std::os::unix::fs::symlink(&external, root.join("linked")).unwrap();

        let mapper = PathMapper::discover(&[root.clone()]);
        let real_external = external.canonicalize().unwrap();
        assert!(mapper.watch_paths().contains(&real_external));

        let mapped = mapper.map_to_literal(&real_external.join("x.safetensors"));
        assert_eq!(mapped, root.join("linked").join("x.safetensors"));
    }
}
