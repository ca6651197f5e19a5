//! FileSystem trait abstraction for the persisted side of the document store.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in workflow-sync-server) - Uses tokio::fs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    /// Paths whose writes fail with an IO error
    failing: RwLock<HashSet<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Make every write to `path` fail, for testing error paths.
    pub fn fail_writes_to(&self, path: &str) {
        let path = Self::normalize_path(path);
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path);
    }

    /// Read a file as UTF-8, for test assertions.
    pub fn contents(&self, path: &str) -> Option<String> {
        let path = Self::normalize_path(path);
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            match normalized.rfind('/') {
                Some(pos) => Some(normalized[..pos].to_string()),
                None => Some(String::new()),
            }
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        if self.dirs.read().unwrap_or_else(|e| e.into_inner()).contains(&path) {
            return Err(FsError::IsDirectory(path));
        }
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);

        if self.failing.read().unwrap_or_else(|e| e.into_inner()).contains(&path) {
            return Err(FsError::Io(format!("write refused: {}", path)));
        }
        if self.dirs.read().unwrap_or_else(|e| e.into_inner()).contains(&path) {
            return Err(FsError::IsDirectory(path));
        }

        // Create parent directories
        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir(&parent).await?;
        }

        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path, content.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if path.is_empty() {
            return Ok(()); // Root always exists
        }

        // Create parent first
        if let Some(parent) = Self::parent_path(&path) {
            Box::pin(self.mkdir(&parent)).await?;
        }

        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
        dirs.insert(path);
        Ok(())
    }
}

// Lets a test keep a handle on the filesystem it hands to a store
#[async_trait]
impl<T: FileSystem> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }
}
