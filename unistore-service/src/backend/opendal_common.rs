use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use jiff::Timestamp;
use opendal::{EntryMode, ErrorKind, Operator};
use unistore_types::CanonicalPath;

use super::{Backend, ListPage, ObjectMeta};
use crate::PayloadStream;
use crate::error::{AuthError, AuthErrorKind, StorageError, StorageResult};

/// A backend that drives an [`opendal::Operator`].
///
/// Used for the S3-compatible stores and Azure Blob, which differ only in how the operator is
/// built and in their reported endpoint.
pub struct OpendalBackend {
    name: &'static str,
    operator: Operator,
    endpoint: String,
    public_url: Option<String>,
    url_expiry: Duration,
}

impl OpendalBackend {
    pub(super) fn new(
        name: &'static str,
        operator: Operator,
        endpoint: String,
        public_url: Option<String>,
        url_expiry: Duration,
    ) -> Self {
        Self {
            name,
            operator,
            endpoint,
            public_url: public_url.map(|url| url.trim_end_matches('/').to_owned()),
            url_expiry,
        }
    }

    fn map_error(&self, context: &str, path: &CanonicalPath, err: opendal::Error) -> StorageError {
        match err.kind() {
            ErrorKind::NotFound => StorageError::not_found(path),
            ErrorKind::PermissionDenied => StorageError::Auth(AuthError::new(
                AuthErrorKind::PermissionDenied,
                err.to_string(),
            )),
            ErrorKind::Unsupported => StorageError::NotSupported {
                backend: self.name,
                operation: context.to_owned(),
            },
            _ => {
                let retryable = err.is_temporary() || err.kind() == ErrorKind::RateLimited;
                StorageError::Transfer {
                    context: format!("{context} {path}"),
                    cause: Some(Box::new(err)),
                    retryable,
                }
            }
        }
    }
}

impl fmt::Debug for OpendalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpendalBackend")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn timestamp(metadata: &opendal::Metadata) -> Option<Timestamp> {
    metadata
        .last_modified()
        .and_then(|dt| Timestamp::from_second(dt.timestamp()).ok())
}

/// Directory to list for `prefix`, in the trailing-slash form opendal expects.
fn list_root(prefix: &CanonicalPath) -> String {
    match prefix.parent() {
        "" => "/".to_owned(),
        parent => format!("{parent}/"),
    }
}

#[async_trait::async_trait]
impl Backend for OpendalBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>> {
        tracing::debug!(backend = self.name, "Reading object");

        match self.operator.stat(path.as_str()).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.map_error("stat", path, err)),
        }

        let stream = self
            .operator
            .reader(path.as_str())
            .await
            .map_err(|e| self.map_error("read", path, e))?
            .into_bytes_stream(..)
            .await
            .map_err(|e| self.map_error("read", path, e))?;

        Ok(Some(stream.boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn write(
        &self,
        path: &CanonicalPath,
        content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta> {
        tracing::debug!(backend = self.name, size = contents.len(), "Writing object");
        let size = contents.len() as u64;

        self.operator
            .write_with(path.as_str(), contents)
            .content_type(content_type)
            .await
            .map_err(|e| self.map_error("write", path, e))?;

        Ok(ObjectMeta {
            path: path.clone(),
            size,
            last_modified: Some(Timestamp::now()),
        })
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()> {
        tracing::debug!(backend = self.name, "Deleting object");
        self.operator
            .delete(path.as_str())
            .await
            .map_err(|e| self.map_error("delete", path, e))
    }

    #[tracing::instrument(level = "trace", fields(?prefix), skip_all)]
    async fn list_page(
        &self,
        prefix: &CanonicalPath,
        _token: Option<String>,
    ) -> StorageResult<ListPage> {
        let mut lister = self
            .operator
            .lister_with(&list_root(prefix))
            .recursive(true)
            .await
            .map_err(|e| self.map_error("list", prefix, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| self.map_error("list", prefix, e))?
        {
            let metadata = entry.metadata();
            if metadata.mode() != EntryMode::FILE {
                continue;
            }

            let path = CanonicalPath::new(entry.path());
            if path.matches_prefix(prefix) {
                entries.push(ObjectMeta {
                    path,
                    size: metadata.content_length(),
                    last_modified: timestamp(metadata),
                });
            }
        }

        Ok(ListPage {
            entries,
            next: None,
        })
    }

    async fn url(&self, path: &CanonicalPath) -> StorageResult<String> {
        if let Some(base) = &self.public_url {
            return Ok(format!("{base}/{path}"));
        }

        let request = self
            .operator
            .presign_read(path.as_str(), self.url_expiry)
            .await
            .map_err(|e| self.map_error("get_url", path, e))?;
        Ok(request.uri().to_string())
    }
}
