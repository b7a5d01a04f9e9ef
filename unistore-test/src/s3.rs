//! A fake S3 REST API with path-style addressing, in the spirit of MinIO.
//!
//! Requests are not authenticated; signatures are accepted as sent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::server::TestServer;

const LAST_MODIFIED: &str = "Wed, 01 May 2024 12:00:00 GMT";
const LAST_MODIFIED_ISO: &str = "2024-05-01T12:00:00.000Z";

#[derive(Debug)]
struct S3State {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<String, (String, Bytes)>>,
}

/// A running fake S3 server holding a single bucket.
#[derive(Debug)]
pub struct FakeS3 {
    server: TestServer,
    state: Arc<S3State>,
}

impl FakeS3 {
    /// Starts a server for `bucket`. Listings return two keys per page.
    pub fn start(bucket: &str) -> Self {
        let state = Arc::new(S3State {
            bucket: bucket.into(),
            page_size: 2,
            objects: Mutex::default(),
        });

        let router = Router::new()
            .route("/{bucket}", get(list).post(delete_objects))
            .route(
                "/{bucket}/{*key}",
                get(get_object).put(put_object).delete(delete_object),
            )
            .with_state(state.clone());

        Self {
            server: TestServer::start(router),
            state,
        }
    }

    /// Base URL to configure as the S3 endpoint.
    pub fn endpoint(&self) -> String {
        self.server.base_url()
    }

    /// Returns the stored content type and contents of an object.
    pub fn object(&self, key: &str) -> Option<(String, Vec<u8>)> {
        let objects = self.state.objects.lock().unwrap();
        objects
            .get(key)
            .map(|(content_type, contents)| (content_type.clone(), contents.to_vec()))
    }

    /// Stores an object directly.
    pub fn insert_object(&self, key: &str, contents: &[u8]) {
        self.state.objects.lock().unwrap().insert(
            key.into(),
            ("binary/octet-stream".into(), Bytes::copy_from_slice(contents)),
        );
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml(status: StatusCode, body: String) -> Response {
    let body = format!(r#"<?xml version="1.0" encoding="UTF-8"?>{body}"#);
    (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    xml(
        status,
        format!("<Error><Code>{code}</Code><Message>{message}</Message></Error>"),
    )
}

fn no_such_bucket() -> Response {
    error(StatusCode::NOT_FOUND, "NoSuchBucket", "The specified bucket does not exist")
}

fn etag(contents: &[u8]) -> String {
    format!("\"{:08x}\"", contents.len())
}

/// `ListObjectsV2`, honoring `prefix`, `delimiter` and `continuation-token`.
async fn list(
    State(state): State<Arc<S3State>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if bucket != state.bucket {
        return no_such_bucket();
    }

    let prefix = params.get("prefix").map(String::as_str).unwrap_or_default();
    let delimiter = params
        .get("delimiter")
        .map(String::as_str)
        .filter(|d| !d.is_empty());
    let start: usize = params
        .get("continuation-token")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    let objects = state.objects.lock().unwrap();
    let mut contents = Vec::new();
    let mut common_prefixes = Vec::new();
    for (key, (_, body)) in objects.range(prefix.to_owned()..) {
        let Some(rest) = key.strip_prefix(prefix) else {
            break;
        };
        match delimiter.and_then(|d| rest.find(d).map(|i| (i, d.len()))) {
            Some((index, len)) => {
                let common = format!("{prefix}{}", &rest[..index + len]);
                if common_prefixes.last() != Some(&common) {
                    common_prefixes.push(common);
                }
            }
            None => contents.push((key.clone(), body.len(), etag(body))),
        }
    }

    let page: Vec<_> = contents.iter().skip(start).take(state.page_size).collect();
    let end = start + page.len();
    let truncated = end < contents.len();

    let mut body = format!(
        r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>{}</Name><Prefix>{}</Prefix><KeyCount>{}</KeyCount><MaxKeys>{}</MaxKeys><IsTruncated>{truncated}</IsTruncated>"#,
        escape(&state.bucket),
        escape(prefix),
        page.len(),
        state.page_size,
    );
    for (key, size, etag) in page {
        body.push_str(&format!(
            "<Contents><Key>{}</Key><LastModified>{LAST_MODIFIED_ISO}</LastModified><ETag>{}</ETag><Size>{size}</Size><StorageClass>STANDARD</StorageClass></Contents>",
            escape(key),
            escape(etag),
        ));
    }
    // Directories are reported with the first page only.
    if start == 0 {
        for common in &common_prefixes {
            body.push_str(&format!(
                "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
                escape(common)
            ));
        }
    }
    if truncated {
        body.push_str(&format!("<NextContinuationToken>{end}</NextContinuationToken>"));
    }
    body.push_str("</ListBucketResult>");

    xml(StatusCode::OK, body)
}

/// Serves both `GetObject` and `HeadObject`. Range requests receive the whole object.
async fn get_object(
    State(state): State<Arc<S3State>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    if bucket != state.bucket {
        return no_such_bucket();
    }

    let objects = state.objects.lock().unwrap();
    let Some((content_type, contents)) = objects.get(&key) else {
        return error(StatusCode::NOT_FOUND, "NoSuchKey", "The specified key does not exist.");
    };

    (
        [
            (header::CONTENT_TYPE, content_type.clone()),
            (header::CONTENT_LENGTH, contents.len().to_string()),
            (header::LAST_MODIFIED, LAST_MODIFIED.to_owned()),
            (header::ETAG, etag(contents)),
        ],
        contents.clone(),
    )
        .into_response()
}

async fn put_object(
    State(state): State<Arc<S3State>>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if bucket != state.bucket {
        return no_such_bucket();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("binary/octet-stream")
        .to_owned();

    let tag = etag(&body);
    state
        .objects
        .lock()
        .unwrap()
        .insert(key, (content_type, body));
    (StatusCode::OK, [(header::ETAG, tag)]).into_response()
}

/// `DeleteObject` succeeds whether or not the key exists, as S3 does.
async fn delete_object(
    State(state): State<Arc<S3State>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    if bucket != state.bucket {
        return no_such_bucket();
    }
    state.objects.lock().unwrap().remove(&key);
    StatusCode::NO_CONTENT.into_response()
}

/// `DeleteObjects` (`POST /{bucket}?delete`) with the keys taken from the XML body.
async fn delete_objects(
    State(state): State<Arc<S3State>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    if bucket != state.bucket {
        return no_such_bucket();
    }
    if !params.contains_key("delete") {
        return error(StatusCode::BAD_REQUEST, "InvalidRequest", "unsupported operation");
    }

    let keys = body
        .split("<Key>")
        .skip(1)
        .filter_map(|part| part.split_once("</Key>").map(|(key, _)| key.to_owned()));

    let mut objects = state.objects.lock().unwrap();
    let mut result = String::from(r#"<DeleteResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
    for key in keys {
        let key = key
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&");
        objects.remove(&key);
        result.push_str(&format!("<Deleted><Key>{}</Key></Deleted>", escape(&key)));
    }
    result.push_str("</DeleteResult>");

    xml(StatusCode::OK, result)
}
