use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::ports::{
    kv_client::KvEntry,
    snapshot_store::{SnapshotError, SnapshotResult, SnapshotStore},
};

const SNAPSHOT_EXTENSION: &str = ".json";

/// Snapshot store writing one file per entry below `<dir>/<key segments>/`.
///
/// File names are the url-encoded entry path relative to the source key, so nested
/// entries stay in a single flat directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
    // Part of `root` derived from the key; the configured directory is trusted.
    key_path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        let key_path = key
            .trim()
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(PathBuf::new(), |path, segment| path.join(segment));
        Self {
            root: dir.as_ref().join(&key_path),
            key_path,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys such as "../x" must not move the snapshot outside its directory.
    fn checked_root(&self) -> SnapshotResult<&Path> {
        if self
            .key_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SnapshotError::InvalidPath(format!(
                "Path traversal attempt detected: {}",
                self.key_path.display()
            )));
        }
        Ok(&self.root)
    }

    fn file_name(relative: &str) -> String {
        format!("{}{SNAPSHOT_EXTENSION}", urlencoding::encode(relative))
    }

    async fn remove_stale(root: &Path) -> SnapshotResult<()> {
        let mut dir = tokio::fs::read_dir(root).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            if name.to_string_lossy().ends_with(SNAPSHOT_EXTENSION) && item.file_type().await?.is_file()
            {
                tokio::fs::remove_file(item.path()).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, entries: &[KvEntry], key_to_remove: &str) -> SnapshotResult<()> {
        let root = self.checked_root()?;
        tokio::fs::create_dir_all(root).await?;
        Self::remove_stale(root).await?;

        for entry in entries.iter().filter(|entry| entry.has_value()) {
            let Some(value) = &entry.value else {
                continue;
            };
            let relative = entry
                .key
                .strip_prefix(key_to_remove)
                .unwrap_or(&entry.key)
                .trim()
                .trim_matches('/');
            let path = root.join(Self::file_name(relative));
            tokio::fs::write(&path, value).await?;
            tracing::debug!(path = %path.display(), "Wrote configuration snapshot");
        }
        Ok(())
    }

    async fn restore(&self) -> SnapshotResult<Vec<KvEntry>> {
        let root = self.checked_root()?;
        let mut dir = match tokio::fs::read_dir(root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::IoError(e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name().to_string_lossy().into_owned();
            let Some(encoded) = file_name.strip_suffix(SNAPSHOT_EXTENSION) else {
                continue;
            };
            if !item.file_type().await?.is_file() {
                continue;
            }
            let relative = urlencoding::decode(encoded)
                .map_err(|e| SnapshotError::InvalidPath(format!("{file_name}: {e}")))?
                .into_owned();
            let bytes = tokio::fs::read(item.path()).await?;
            if !bytes.is_empty() {
                entries.push(KvEntry::new(relative, Bytes::from(bytes)));
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
