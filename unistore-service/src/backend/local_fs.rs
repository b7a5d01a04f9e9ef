use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::StreamExt;
use jiff::Timestamp;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use unistore_types::CanonicalPath;

use super::{Backend, ListPage, ObjectMeta};
use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};

/// Stores objects as files below a root directory.
#[derive(Debug)]
pub struct LocalFs {
    path: PathBuf,
}

impl LocalFs {
    /// Creates a backend rooted at `path`.
    pub fn new(path: &Path) -> Self {
        Self { path: path.into() }
    }

    fn resolve(&self, path: &CanonicalPath) -> StorageResult<PathBuf> {
        let mut resolved = self.path.clone();
        for segment in path.segments() {
            match segment {
                "." => {}
                ".." => {
                    return Err(StorageError::InvalidPath {
                        path: path.to_string(),
                        reason: "parent directory components are not allowed",
                    });
                }
                segment => resolved.push(segment),
            }
        }
        Ok(resolved)
    }

    fn meta(&self, file: &Path, metadata: &std::fs::Metadata) -> Option<ObjectMeta> {
        let relative = file.strip_prefix(&self.path).ok()?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Some(ObjectMeta {
            path: CanonicalPath::new(&key),
            size: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|t| Timestamp::try_from(t).ok()),
        })
    }
}

#[async_trait::async_trait]
impl Backend for LocalFs {
    fn name(&self) -> &'static str {
        "local-fs"
    }

    fn endpoint(&self) -> String {
        self.path.display().to_string()
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>> {
        let file_path = self.resolve(path)?;
        let file = match OpenOptions::new().read(true).open(&file_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(StorageError::transfer("opening file", err)),
        };

        if file.metadata().await?.is_dir() {
            return Ok(None);
        }

        Ok(Some(ReaderStream::new(file).boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn write(
        &self,
        path: &CanonicalPath,
        _content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta> {
        tracing::debug!(size = contents.len(), "Writing to local-fs backend");
        let file_path = self.resolve(path)?;
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file_path)
            .await?;
        file.write_all(&contents).await?;
        file.flush().await?;
        file.sync_data().await?;

        let metadata = file.metadata().await?;
        drop(file);

        self.meta(&file_path, &metadata)
            .ok_or_else(|| StorageError::transfer_msg("written file escaped the storage root"))
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()> {
        let file_path = self.resolve(path)?;
        match tokio::fs::remove_file(&file_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::not_found(path)),
            Err(err) => Err(StorageError::transfer("deleting file", err)),
        }
    }

    #[tracing::instrument(level = "trace", fields(?prefix), skip_all)]
    async fn list_page(
        &self,
        prefix: &CanonicalPath,
        _token: Option<String>,
    ) -> StorageResult<ListPage> {
        // The deepest directory that can contain matches is the parent of the prefix, since the
        // last segment may be a partial file name.
        let start = self.resolve(&CanonicalPath::new(prefix.parent()))?;

        let mut entries = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                // A file in place of a directory holds no objects below it.
                Err(err)
                    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) =>
                {
                    continue;
                }
                Err(err) => return Err(StorageError::transfer("reading directory", err)),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else if let Some(meta) = self.meta(&entry.path(), &metadata)
                    && meta.path.matches_prefix(prefix)
                {
                    entries.push(meta);
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(ListPage {
            entries,
            next: None,
        })
    }

    async fn url(&self, path: &CanonicalPath) -> StorageResult<String> {
        let file_path = std::path::absolute(self.resolve(path)?)?;
        url::Url::from_file_path(&file_path)
            .map(String::from)
            .map_err(|()| StorageError::InvalidPath {
                path: path.to_string(),
                reason: "cannot be expressed as a file URL",
            })
    }
}
