//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use workflow_sync::fs::{FileSystem, FsError, Result};

/// Native filesystem rooted at the server's workspace directory.
///
/// Relative paths resolve against the root; absolute paths (from `file://`
/// URIs) are used as they are.
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

fn map_err(path: &Path, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.display().to_string()),
        ErrorKind::IsADirectory => FsError::IsDirectory(path.display().to_string()),
        _ => FsError::Io(format!("{}: {}", path.display(), e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        if fs::metadata(&full_path).await.is_ok_and(|m| m.is_dir()) {
            return Err(FsError::IsDirectory(full_path.display().to_string()));
        }
        fs::read(&full_path).await.map_err(|e| map_err(&full_path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_err(parent, e))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| map_err(&full_path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path);
        fs::try_exists(&full_path)
            .await
            .map_err(|e| map_err(&full_path, e))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| map_err(&full_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_relative_and_absolute_paths() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.write("flows/a.wf", b"workflow:").await.unwrap();
        assert!(fs.exists("flows").await.unwrap());

        let absolute = dir.path().join("flows/a.wf");
        let content = fs.read(absolute.to_str().unwrap()).await.unwrap();
        assert_eq!(content, b"workflow:");
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        fs.mkdir("sub").await.unwrap();

        assert!(matches!(fs.read("missing.wf").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.read("sub").await, Err(FsError::IsDirectory(_))));
    }
}
