//! In-memory backend for tests.
//!
//! Listing is paged with a configurable page size so that tests can observe how the facade
//! follows continuation tokens.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use jiff::Timestamp;
use unistore_types::CanonicalPath;

use super::{Backend, ListPage, ObjectMeta};
use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub(crate) struct InMemoryBackend {
    store: Arc<Mutex<BTreeMap<CanonicalPath, (Bytes, Timestamp)>>>,
    page_size: usize,
    list_calls: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    pub fn new(page_size: usize) -> Self {
        Self {
            store: Default::default(),
            page_size,
            list_calls: Default::default(),
        }
    }

    /// Returns the stored bytes, if present.
    pub fn get_stored(&self, path: &str) -> Option<Bytes> {
        let store = self.store.lock().unwrap();
        store.get(&CanonicalPath::new(path)).map(|(b, _)| b.clone())
    }

    /// Number of `list_page` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn endpoint(&self) -> String {
        "memory://".into()
    }

    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>> {
        let entry = self.store.lock().unwrap().get(path).cloned();
        Ok(entry.map(|(bytes, _)| crate::stream::from_bytes(bytes)))
    }

    async fn write(
        &self,
        path: &CanonicalPath,
        _content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta> {
        let size = contents.len() as u64;
        let now = Timestamp::now();
        self.store
            .lock()
            .unwrap()
            .insert(path.clone(), (contents, now));
        Ok(ObjectMeta {
            path: path.clone(),
            size,
            last_modified: Some(now),
        })
    }

    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()> {
        match self.store.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn list_page(
        &self,
        _prefix: &CanonicalPath,
        token: Option<String>,
    ) -> StorageResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let start: usize = token.map_or(0, |t| t.parse().unwrap());

        // Ignores the prefix; filtering is left to the facade.
        let store = self.store.lock().unwrap();
        let entries: Vec<_> = store
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|(path, (bytes, modified))| ObjectMeta {
                path: path.clone(),
                size: bytes.len() as u64,
                last_modified: Some(*modified),
            })
            .collect();

        let end = start + entries.len();
        let next = (end < store.len()).then(|| end.to_string());
        Ok(ListPage { entries, next })
    }
}
