//! The [`Storage`] facade.

use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio::io::AsyncRead;
use unistore_types::CanonicalPath;

use crate::PayloadStream;
use crate::backend::{BoxedBackend, create_backend};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::object::Object;
use crate::{content_type, materialize, stream};

/// High-level asynchronous handle to one storage provider.
///
/// All operations accept any supported path representation (absolute URLs, scheme-relative
/// URLs, Windows-style and root-relative paths) and normalize it to a [`CanonicalPath`] before
/// the provider is contacted. Cloning is cheap and clones share the backend.
#[derive(Clone, Debug)]
pub struct Storage(Arc<StorageInner>);

#[derive(Debug)]
struct StorageInner {
    backend: BoxedBackend,
}

impl Storage {
    /// Creates a `Storage` with the specified configuration.
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        let backend = create_backend(config).await?;
        Ok(Self::from_backend(backend))
    }

    /// Wraps an already constructed backend.
    pub fn from_backend(backend: BoxedBackend) -> Self {
        Self(Arc::new(StorageInner { backend }))
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.0.backend.name()
    }

    /// Downloads an object into a temporary file positioned at offset 0.
    ///
    /// The file is removed when the returned handle is dropped.
    pub async fn get(&self, path: &str) -> StorageResult<NamedTempFile> {
        let path = object_path(path)?;
        let stream = self.open(&path).await?;
        let suffix = path.extension().map(|ext| format!(".{ext}")).unwrap_or_default();
        materialize::materialize(stream, &suffix).await
    }

    /// Streams the contents of an object.
    pub async fn get_stream(&self, path: &str) -> StorageResult<PayloadStream> {
        let path = object_path(path)?;
        self.open(&path).await
    }

    async fn open(&self, path: &CanonicalPath) -> StorageResult<PayloadStream> {
        self.0
            .backend
            .open_read(path)
            .await?
            .ok_or_else(|| StorageError::not_found(path))
    }

    /// Stores the contents of `stream` at `path`, overwriting an existing object.
    ///
    /// The content type is derived from the path extension, falling back to sniffing the
    /// payload.
    pub async fn put(&self, path: &str, stream: PayloadStream) -> StorageResult<Object> {
        let path = object_path(path)?;
        let contents = stream::collect(stream)
            .await
            .map_err(|e| StorageError::transfer("reading upload payload", e))?;

        let content_type = content_type::detect(&path, &contents);
        tracing::debug!(
            backend = self.backend_name(),
            %path,
            %content_type,
            size = contents.len(),
            "Storing object"
        );

        let meta = self.0.backend.write(&path, &content_type, contents).await?;
        Ok(Object::new(meta, self.clone()))
    }

    /// Stores everything `reader` yields at `path`.
    pub async fn put_reader<R>(&self, path: &str, reader: R) -> StorageResult<Object>
    where
        R: AsyncRead + Send + 'static,
    {
        self.put(path, stream::from_reader(reader)).await
    }

    /// Deletes the object at `path`.
    pub async fn delete(&self, path: &str) -> StorageResult<()> {
        let path = object_path(path)?;
        self.0.backend.delete(&path).await
    }

    /// Lists all objects whose key starts with `prefix`.
    ///
    /// A trailing separator on the prefix is ignored. Pages are requested until the backend
    /// stops returning a continuation token.
    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<Object>> {
        let prefix = CanonicalPath::prefix(prefix);
        let mut objects = Vec::new();
        let mut token = None;
        let mut pages = 0usize;

        loop {
            let page = self.0.backend.list_page(&prefix, token.clone()).await?;
            pages += 1;

            objects.extend(
                page.entries
                    .into_iter()
                    .filter(|meta| meta.path.matches_prefix(&prefix))
                    .map(|meta| Object::new(meta, self.clone())),
            );

            match page.next {
                Some(next) if token.as_ref() == Some(&next) => {
                    return Err(StorageError::transfer_msg(format!(
                        "{} repeated continuation token {next:?}",
                        self.backend_name()
                    )));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        tracing::debug!(%prefix, pages, objects = objects.len(), "Listed objects");
        Ok(objects)
    }

    /// Returns a URL through which the object can be fetched directly.
    pub async fn get_url(&self, path: &str) -> StorageResult<String> {
        let path = object_path(path)?;
        self.0.backend.url(&path).await
    }

    /// The configured base endpoint of the backend.
    pub fn endpoint(&self) -> String {
        self.0.backend.endpoint()
    }

    /// Releases provider-side resources, such as logging out of a NAS session.
    pub async fn shutdown(&self) -> StorageResult<()> {
        self.0.backend.shutdown().await
    }
}

/// Normalizes `input` and rejects the empty key.
fn object_path(input: &str) -> StorageResult<CanonicalPath> {
    let path = CanonicalPath::new(input);
    if path.is_empty() {
        return Err(StorageError::InvalidPath {
            path: input.to_owned(),
            reason: "object key is empty",
        });
    }
    Ok(path)
}
