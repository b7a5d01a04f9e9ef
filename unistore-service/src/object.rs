use std::fmt;

use jiff::Timestamp;
use tempfile::NamedTempFile;
use unistore_types::CanonicalPath;

use crate::PayloadStream;
use crate::backend::ObjectMeta;
use crate::error::StorageResult;
use crate::service::Storage;

/// A stored object as reported by [`Storage::put`] and [`Storage::list`].
///
/// Objects keep a handle to the storage that produced them, so their contents can be fetched
/// lazily.
#[derive(Clone)]
pub struct Object {
    /// Canonical path of the object.
    pub path: CanonicalPath,
    /// Display name, the last path segment.
    pub name: String,
    /// Last modification time, if the provider reports one.
    pub last_modified: Option<Timestamp>,
    /// Size in bytes, `0` when the provider does not report it.
    pub size: u64,
    storage: Storage,
}

impl Object {
    pub(crate) fn new(meta: ObjectMeta, storage: Storage) -> Self {
        Self {
            name: meta.path.name().to_owned(),
            path: meta.path,
            last_modified: meta.last_modified,
            size: meta.size,
            storage,
        }
    }

    /// The storage this object belongs to.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Downloads the object into a temporary file.
    pub async fn get(&self) -> StorageResult<NamedTempFile> {
        self.storage.get(self.path.as_str()).await
    }

    /// Streams the contents of the object.
    pub async fn get_stream(&self) -> StorageResult<PayloadStream> {
        self.storage.get_stream(self.path.as_str()).await
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("last_modified", &self.last_modified)
            .field("size", &self.size)
            .field("backend", &self.storage.backend_name())
            .finish()
    }
}
