//! A uniform interface over heterogeneous object stores.
//!
//! [`Storage`] exposes the same operations for every provider: fetch an object into a temporary
//! file or as a stream, store, delete, list by prefix, resolve a direct URL and report the
//! endpoint. Providers are selected with [`StorageConfig`]:
//!
//! - the local filesystem,
//! - S3 and S3-compatible stores (Cloudflare R2, Aliyun OSS, Tencent COS, Qiniu Kodo, MinIO),
//! - Azure Blob Storage,
//! - Google Cloud Storage,
//! - Synology NAS devices through DSM File Station,
//! - Casdoor resource storage.
//!
//! Object keys are normalized with [`CanonicalPath`] before they reach a provider, so
//! `https://bucket.example.com/a/b.txt`, `/a/b.txt` and `a\b.txt` style inputs all address the
//! same key.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod config;
mod content_type;
pub mod error;
mod materialize;
mod object;
mod service;
pub mod stream;

pub use backend::{Backend, ListPage, ObjectMeta};
pub use config::StorageConfig;
pub use content_type::detect as detect_content_type;
pub use error::{AuthError, AuthErrorKind, StorageError, StorageResult};
pub use materialize::materialize;
pub use object::Object;
pub use service::Storage;
pub use stream::PayloadStream;
pub use unistore_types::CanonicalPath;
