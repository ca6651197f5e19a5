//! File watcher with debouncing for external edits to workflow files.
//!
//! Uses notify-debouncer-mini for efficient file change detection. Events
//! carry absolute paths so they map directly onto `file://` document URIs.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};
use url::Url;

const BACKUP_EXTENSION: &str = "backup";

/// File event from the watcher.
#[derive(Debug, Clone)]
pub struct FileEvent {
    /// Absolute path of the changed file
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    /// `file://` URI of the changed file.
    pub fn uri(&self) -> Option<String> {
        Url::from_file_path(&self.path).ok().map(String::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// Watches the workspace root for changes to workflow files.
pub struct FileWatcher {
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Last seen mtime per file, to drop events that changed nothing
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

impl FileWatcher {
    /// Watch `root` recursively, coalescing events within `debounce`.
    pub fn new(root: PathBuf, debounce: Duration) -> Result<Self> {
        // FSEvents on macOS reports canonical paths
        let root = root.canonicalize().unwrap_or(root);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root_clone = root.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            debounce,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event, &root_clone, &mtime_cache) {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Turn a debounced event into a `FileEvent` if it concerns a document.
    fn process_event(event: &DebouncedEvent, root: &Path, mtime_cache: &MtimeCache) -> Option<FileEvent> {
        let path = &event.path;
        let relative = path.strip_prefix(root).ok()?;
        if !is_document_path(relative) || path.is_dir() {
            return None;
        }

        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            FileEventKind::Modified => {
                let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
                if cache.get(path) == Some(&mtime) {
                    return None;
                }
                cache.insert(path.clone(), mtime);
            }
            FileEventKind::Deleted => {
                cache.remove(path);
            }
        }

        debug!("File event: {:?} - {}", kind, path.display());
        Some(FileEvent {
            path: path.clone(),
            kind,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Hidden entries and `.backup` copies under the root are not documents.
fn is_document_path(relative: &Path) -> bool {
    let hidden = relative
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')));
    let backup = relative.extension().is_some_and(|ext| ext == BACKUP_EXTENSION);
    !hidden && !backup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_paths() {
        assert!(is_document_path(Path::new("flows/order.wf")));
        assert!(!is_document_path(Path::new("flows/order.wf.backup")));
        assert!(!is_document_path(Path::new(".git/HEAD")));
        assert!(!is_document_path(Path::new("flows/.order.wf.swp")));
    }

    #[test]
    fn test_event_uri() {
        let event = FileEvent {
            path: PathBuf::from("/work/my flows/order.wf"),
            kind: FileEventKind::Modified,
        };
        assert_eq!(event.uri().as_deref(), Some("file:///work/my%20flows/order.wf"));
    }
}
