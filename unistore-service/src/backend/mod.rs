//! Provider backends behind the [`Storage`](crate::Storage) facade.
//!
//! Every provider implements [`Backend`]. Paths handed to a backend are already canonical; the
//! backend maps them onto provider keys and maps provider keys back before reporting them.

use std::fmt::Debug;

use bytes::Bytes;
use jiff::Timestamp;
use unistore_types::CanonicalPath;

use crate::PayloadStream;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

mod azure_blob;
mod casdoor;
mod gcs;
#[cfg(test)]
pub(crate) mod in_memory;
mod local_fs;
mod opendal_common;
mod s3_compatible;
mod synology;

pub use casdoor::CasdoorBackend;
pub use gcs::GcsBackend;
pub use local_fs::LocalFs;
pub use opendal_common::OpendalBackend;
pub use synology::{SessionState, SynologyBackend};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("unistore/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Backend`] instance.
pub type BoxedBackend = Box<dyn Backend>;

/// What a backend reports about a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Canonical path of the object.
    pub path: CanonicalPath,
    /// Size in bytes, `0` when the provider does not report it.
    pub size: u64,
    /// Last modification time, if known.
    pub last_modified: Option<Timestamp>,
}

impl ObjectMeta {
    /// Creates metadata without a timestamp.
    pub fn new(path: CanonicalPath, size: u64) -> Self {
        Self {
            path,
            size,
            last_modified: None,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct ListPage {
    /// Objects on this page.
    pub entries: Vec<ObjectMeta>,
    /// Continuation token for the next page, `None` on the last page.
    pub next: Option<String>,
}

/// Capability contract every storage provider implements.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// The configured base endpoint. Never fails.
    fn endpoint(&self) -> String;

    /// Opens the object for reading, or returns `None` if it does not exist.
    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>>;

    /// Stores `contents` at `path`, overwriting any existing object.
    async fn write(
        &self,
        path: &CanonicalPath,
        content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta>;

    /// Deletes the object at `path`.
    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()>;

    /// Lists one page of objects whose key starts with `prefix`.
    ///
    /// Backends may return entries outside the prefix; the facade filters them.
    async fn list_page(
        &self,
        prefix: &CanonicalPath,
        token: Option<String>,
    ) -> StorageResult<ListPage>;

    /// Returns a URL through which the object can be fetched directly.
    async fn url(&self, path: &CanonicalPath) -> StorageResult<String> {
        let _ = path;
        Err(StorageError::NotSupported {
            backend: self.name(),
            operation: "get_url".into(),
        })
    }

    /// Releases provider-side resources such as sessions.
    async fn shutdown(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Creates the backend described by `config`.
pub async fn create_backend(config: StorageConfig) -> StorageResult<BoxedBackend> {
    Ok(match config {
        StorageConfig::FileSystem { path } => Box::new(LocalFs::new(&path)),
        StorageConfig::S3Compatible(config) => Box::new(s3_compatible::s3_compatible(&config)?),
        StorageConfig::AzureBlob(config) => Box::new(azure_blob::azure_blob(&config)?),
        StorageConfig::Gcs(config) => Box::new(GcsBackend::new(config).await?),
        StorageConfig::Synology(config) => Box::new(SynologyBackend::new(config)?),
        StorageConfig::Casdoor(config) => Box::new(CasdoorBackend::new(config).await?),
    })
}

/// Creates a reqwest client builder with the defaults shared by all HTTP backends.
pub(crate) fn reqwest_client() -> reqwest::ClientBuilder {
    reqwest::Client::builder().user_agent(USER_AGENT)
}

/// Finishes a client builder, mapping failures to configuration errors.
pub(crate) fn build_client(builder: reqwest::ClientBuilder) -> StorageResult<reqwest::Client> {
    builder
        .build()
        .map_err(|e| StorageError::Config(format!("cannot create http client: {e}")))
}

/// Maps a reqwest failure to a transfer error, flagging timeouts and connection failures as
/// retryable.
pub(crate) fn reqwest_error(context: impl Into<String>, err: reqwest::Error) -> StorageError {
    let retryable = err.is_timeout() || err.is_connect();
    StorageError::Transfer {
        context: context.into(),
        cause: Some(Box::new(err)),
        retryable,
    }
}
