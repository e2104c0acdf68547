//
// Copyright 2025 Tabs Data Inc.
//

//! Local-disk file storage. Keys are slash-separated paths of conservative
//! segments; anything that could escape the storage root is rejected before it
//! touches the filesystem.

use mb_error::{MbError, mb_error};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

#[mb_error]
pub enum FileError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String) = 0,
    #[error("File not found: {0}")]
    FileNotFound(String) = 1000,
    #[error("File storage is disabled")]
    StorageDisabled = 1001,
    #[error("Storage I/O error on {0}: {1}")]
    Io(String, #[source] std::io::Error) = 7000,
}

/// Status of the storage backend.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub enabled: bool,
    pub files: u64,
    pub bytes: u64,
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, FileError> {
        if key.is_empty() || key.len() > 512 {
            return Err(FileError::InvalidKey(key.to_string()));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            let valid = !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(FileError::InvalidKey(key.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    pub async fn put(&self, key: &str, content: &[u8]) -> Result<(), MbError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| FileError::Io(parent.to_string_lossy().to_string(), err))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|err| FileError::Io(path.to_string_lossy().to_string(), err))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, MbError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::FileNotFound(key.to_string()))?
            }
            Err(err) => Err(FileError::Io(path.to_string_lossy().to_string(), err))?,
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), MbError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::FileNotFound(key.to_string()))?
            }
            Err(err) => Err(FileError::Io(path.to_string_lossy().to_string(), err))?,
        }
    }

    pub async fn status(&self, enabled: bool) -> Result<StorageStatus, MbError> {
        let mut files = 0u64;
        let mut bytes = 0u64;
        if self.root.exists() {
            let mut stack = vec![self.root.clone()];
            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir)
                    .await
                    .map_err(|err| FileError::Io(dir.to_string_lossy().to_string(), err))?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|err| FileError::Io(dir.to_string_lossy().to_string(), err))?
                {
                    let metadata = entry
                        .metadata()
                        .await
                        .map_err(|err| FileError::Io(dir.to_string_lossy().to_string(), err))?;
                    if metadata.is_dir() {
                        stack.push(entry.path());
                    } else {
                        files += 1;
                        bytes += metadata.len();
                    }
                }
            }
        }
        Ok(StorageStatus {
            enabled,
            files,
            bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdir::testdir;

    fn store() -> FileStore {
        FileStore::new(testdir!())
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let store = store();
        store.put("reports/2026/q1.csv", b"a,b\n1,2\n").await.unwrap();
        assert_eq!(store.get("reports/2026/q1.csv").await.unwrap(), b"a,b\n1,2\n");

        store.delete("reports/2026/q1.csv").await.unwrap();
        let err = store.get("reports/2026/q1.csv").await.unwrap_err();
        assert!(matches!(
            err.domain_err::<FileError>(),
            FileError::FileNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let store = store();
        for key in ["../escape", "a/../../b", "/absolute", "a//b", ""] {
            let err = store.put(key, b"x").await.unwrap_err();
            assert!(
                matches!(err.domain_err::<FileError>(), FileError::InvalidKey(_)),
                "key {key:?} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = store();
        store.put("a.txt", b"123").await.unwrap();
        store.put("nested/b.txt", b"4567").await.unwrap();

        let status = store.status(true).await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.files, 2);
        assert_eq!(status.bytes, 7);
    }
}
