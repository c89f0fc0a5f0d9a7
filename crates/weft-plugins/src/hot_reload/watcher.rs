//! File system watcher for plugin changes
//!
//! [`NotifyWatchHost`] is a [`FileWatchHost`] backed by the `notify` crate.
//! [`resolve_plugin_id`] maps a changed path back to the plugin that owns it.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, event::ModifyKind,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use weft_kernel::host::{FileChangeEvent, FileChangeKind, FileWatchHost, HostError, HostResult};

/// Directory names whose contents never trigger a reload
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "__pycache__"];
/// File names that never trigger a reload
const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];
/// Extensions of editor swap files and bytecode caches
const IGNORED_EXTENSIONS: &[&str] = &["pyc", "pyo", "swp", "swo", "tmp"];

/// Conventional directory holding one sub-directory per plugin
const PLUGINS_DIR: &str = "plugins";

/// Whether `path` is editor, VCS or cache noise.
pub fn should_ignore_path(path: &Path) -> bool {
    let in_ignored_dir = path.components().any(|c| match c {
        Component::Normal(name) => IGNORED_DIRS.iter().any(|d| OsStr::new(d) == name),
        _ => false,
    });
    if in_ignored_dir {
        return true;
    }

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if IGNORED_FILES.contains(&file_name) || file_name.ends_with('~') {
        return true;
    }

    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IGNORED_EXTENSIONS.contains(&ext))
}

/// A plugin id the watcher resolves changes for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPlugin {
    pub id: String,
    pub root: Option<PathBuf>,
}

impl WatchedPlugin {
    pub fn new(id: impl Into<String>, root: Option<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root,
        }
    }
}

/// Find the watched plugin that owns `path`.
///
/// Checked in order: the path lies under a plugin's root (deepest root wins);
/// the path contains `plugins/<id>`; any path segment equals a watched id
/// (closest to the file wins). Ignored paths never resolve.
pub fn resolve_plugin_id(path: &Path, watched: &[WatchedPlugin]) -> Option<String> {
    if should_ignore_path(path) {
        return None;
    }

    let roots: HashMap<&Path, &str> = watched
        .iter()
        .filter_map(|p| p.root.as_deref().map(|root| (root, p.id.as_str())))
        .collect();
    for ancestor in path.ancestors() {
        if let Some(id) = roots.get(ancestor) {
            return Some((*id).to_string());
        }
    }

    let is_watched = |segment: &str| watched.iter().any(|p| p.id == segment);
    let segments: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();

    let under_plugins_dir = segments
        .windows(2)
        .find(|pair| pair[0] == PLUGINS_DIR && is_watched(pair[1]))
        .map(|pair| pair[1]);
    if let Some(id) = under_plugins_dir {
        return Some(id.to_string());
    }

    segments
        .iter()
        .rev()
        .find(|&&segment| is_watched(segment))
        .map(|segment| segment.to_string())
}

/// Translate one `notify` event into change notifications.
pub fn translate_event(event: &Event) -> Vec<FileChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FileChangeKind::Create,
        EventKind::Modify(ModifyKind::Name(_)) => FileChangeKind::Rename,
        EventKind::Modify(_) => FileChangeKind::Modify,
        EventKind::Remove(_) => FileChangeKind::Delete,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| !should_ignore_path(path))
        .map(|path| FileChangeEvent::new(kind, path.clone()))
        .collect()
}

/// [`FileWatchHost`] watching the local file system
pub struct NotifyWatchHost {
    sender: broadcast::Sender<FileChangeEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl NotifyWatchHost {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            watcher: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

impl Default for NotifyWatchHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileWatchHost for NotifyWatchHost {
    async fn watch_start(&self, paths: &[PathBuf]) -> HostResult<()> {
        let sender = self.sender.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for change in translate_event(&event) {
                        debug!("Watch event: {:?}", change);
                        // No receivers is fine; nobody is listening yet.
                        let _ = sender.send(change);
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
            Config::default(),
        )
        .map_err(|e| HostError::failed("watch_start", e.to_string()))?;

        let mut watched = 0;
        for path in paths {
            if !path.exists() {
                warn!("Watch path does not exist: {:?}", path);
                continue;
            }
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| HostError::failed("watch_start", format!("{}: {e}", path.display())))?;
            watched += 1;
        }

        info!(paths = watched, "Plugin file watcher started");
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    async fn watch_stop(&self) -> HostResult<()> {
        if self.watcher.lock().take().is_some() {
            info!("Plugin file watcher stopped");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.sender.subscribe()
    }
}
