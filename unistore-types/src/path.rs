//! Canonical object paths.
//!
//! Storage providers disagree on what an object key looks like. Callers may pass an absolute URL
//! (`https://bucket.s3.amazonaws.com/dir/file.txt`), a scheme-relative URL
//! (`//bucket.s3.amazonaws.com/dir/file.txt`), a Windows-style path (`dir\file.txt`) or a
//! root-relative path (`/dir/file.txt`). All of them converge to the same [`CanonicalPath`]:
//!
//! - no scheme, host, query or fragment,
//! - forward slashes only,
//! - no leading slash.
//!
//! Normalization is a pure string transformation and is idempotent.

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// Base used to resolve scheme-relative URLs. Only the path of the result is ever used.
const RESOLVE_BASE: &str = "https://canonical.invalid/";

/// A normalized, host-free, backslash-free relative object key.
///
/// Construct with [`CanonicalPath::new`], which accepts any supported representation. The empty
/// path is valid and denotes the storage root, which is useful as a listing prefix.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    /// Normalizes `input` into a canonical path.
    pub fn new(input: &str) -> Self {
        let mut current = normalize_once(input);
        loop {
            let next = normalize_once(&current);
            if next == current {
                return Self(current);
            }
            current = next;
        }
    }

    /// Normalizes `input` for use as a listing prefix.
    ///
    /// Listing prefixes never carry a trailing separator: `photos/` and `photos` are the same
    /// prefix and match keys by plain string comparison.
    pub fn prefix(input: &str) -> Self {
        let path = Self::new(input);
        Self::new(path.0.trim_end_matches('/'))
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the path and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns `true` if this is the empty path (the storage root).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the last segment of the path, used as an object's display name.
    pub fn name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((_, name)) => name,
            None => trimmed,
        }
    }

    /// Returns everything before the last segment, without a trailing slash.
    ///
    /// Returns an empty string for paths directly below the root.
    pub fn parent(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        }
    }

    /// Returns the extension of the last segment, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Returns `true` if this path lies under `prefix` by plain string comparison.
    pub fn matches_prefix(&self, prefix: &CanonicalPath) -> bool {
        self.0.starts_with(prefix.as_str())
    }

    /// Appends a relative segment, normalizing the result.
    pub fn join(&self, segment: &str) -> CanonicalPath {
        if self.is_empty() {
            return Self::new(segment);
        }
        Self::new(&format!("{}/{}", self.0, segment.trim_start_matches(['/', '\\'])))
    }

    /// Iterates over the non-empty segments of the path.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }
}

/// A single normalization pass. [`CanonicalPath::new`] repeats it until nothing changes.
fn normalize_once(input: &str) -> String {
    let input = input.replace('\\', "/");
    let path = if is_url(&input) {
        url_path(&input).unwrap_or(input)
    } else {
        input
    };
    path.trim_start_matches('/').to_owned()
}

/// Returns `true` for `scheme://...` and for scheme-relative `//host/...` inputs.
fn is_url(input: &str) -> bool {
    if let Some(rest) = input.strip_prefix("//") {
        return rest.find('/').is_some_and(|pos| pos > 0);
    }

    match input.split_once("://") {
        Some((scheme, _)) => is_scheme(scheme),
        None => false,
    }
}

fn is_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Extracts the percent-decoded path component of a URL.
fn url_path(input: &str) -> Option<String> {
    let base = Url::parse(RESOLVE_BASE).ok()?;
    let url = base.join(input).ok()?;
    Some(percent_decode_str(url.path()).decode_utf8_lossy().into_owned())
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CanonicalPath {
    fn from(input: &str) -> Self {
        Self::new(input)
    }
}

impl From<String> for CanonicalPath {
    fn from(input: String) -> Self {
        Self::new(&input)
    }
}

impl FromStr for CanonicalPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl Serialize for CanonicalPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CanonicalPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}
