//! Shared types for unistore and its backends.
//!
//! The central type is [`CanonicalPath`], the normalized object key that every storage backend
//! operates on, regardless of how the caller spelled the path.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod path;

pub use path::CanonicalPath;
