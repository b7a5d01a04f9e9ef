//! A fake Google Cloud Storage JSON API, in the spirit of `fake-gcs-server`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::server::TestServer;

const UPDATED: &str = "2024-05-01T12:00:00.000Z";

#[derive(Debug)]
struct GcsState {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<String, (String, Bytes)>>,
    list_requests: AtomicUsize,
}

/// A running fake GCS server holding a single bucket.
#[derive(Debug)]
pub struct FakeGcs {
    server: TestServer,
    state: Arc<GcsState>,
}

impl FakeGcs {
    /// Starts a server for `bucket`. Listings return two objects per page.
    pub fn start(bucket: &str) -> Self {
        let state = Arc::new(GcsState {
            bucket: bucket.into(),
            page_size: 2,
            objects: Mutex::default(),
            list_requests: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/storage/v1/b/{bucket}/o", get(list))
            .route(
                "/storage/v1/b/{bucket}/o/{*object}",
                get(download).delete(remove),
            )
            .route("/upload/storage/v1/b/{bucket}/o", post(upload))
            .with_state(state.clone());

        Self {
            server: TestServer::start(router),
            state,
        }
    }

    /// Base URL to configure as the GCS endpoint.
    pub fn endpoint(&self) -> String {
        self.server.base_url()
    }

    /// Number of list requests served so far.
    pub fn list_requests(&self) -> usize {
        self.state.list_requests.load(Ordering::SeqCst)
    }

    /// Returns the stored content type and contents of an object.
    pub fn object(&self, name: &str) -> Option<(String, Vec<u8>)> {
        let objects = self.state.objects.lock().unwrap();
        objects
            .get(name)
            .map(|(content_type, contents)| (content_type.clone(), contents.to_vec()))
    }

    /// Stores an object directly.
    pub fn insert_object(&self, name: &str, contents: &[u8]) {
        self.state.objects.lock().unwrap().insert(
            name.into(),
            ("application/octet-stream".into(), Bytes::copy_from_slice(contents)),
        );
    }
}

fn resource(bucket: &str, name: &str, content_type: &str, size: usize) -> Value {
    json!({
        "kind": "storage#object",
        "bucket": bucket,
        "name": name,
        "contentType": content_type,
        "size": size.to_string(),
        "updated": UPDATED,
    })
}

fn error(status: StatusCode, message: &str) -> Response {
    let body = json!({ "error": { "code": status.as_u16(), "message": message } });
    (status, Json(body)).into_response()
}

async fn list(
    State(state): State<Arc<GcsState>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.list_requests.fetch_add(1, Ordering::SeqCst);
    if bucket != state.bucket {
        return error(StatusCode::NOT_FOUND, "bucket not found");
    }

    let prefix = params.get("prefix").map(String::as_str).unwrap_or_default();
    let start: usize = params
        .get("pageToken")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    let objects = state.objects.lock().unwrap();
    let matching: Vec<_> = objects
        .iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .collect();

    let items: Vec<Value> = matching
        .iter()
        .skip(start)
        .take(state.page_size)
        .map(|(name, (content_type, contents))| {
            resource(&state.bucket, name, content_type, contents.len())
        })
        .collect();

    let end = start + items.len();
    let mut body = json!({ "kind": "storage#objects", "items": items });
    if end < matching.len() {
        body["nextPageToken"] = json!(end.to_string());
    }
    Json(body).into_response()
}

async fn download(
    State(state): State<Arc<GcsState>>,
    Path((bucket, object)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let objects = state.objects.lock().unwrap();
    let Some((content_type, contents)) = objects.get(&object).filter(|_| bucket == state.bucket)
    else {
        return error(StatusCode::NOT_FOUND, "no such object");
    };

    if params.get("alt").map(String::as_str) == Some("media") {
        ([(header::CONTENT_TYPE, content_type.clone())], contents.clone()).into_response()
    } else {
        Json(resource(&state.bucket, &object, content_type, contents.len())).into_response()
    }
}

async fn remove(
    State(state): State<Arc<GcsState>>,
    Path((bucket, object)): Path<(String, String)>,
) -> Response {
    if bucket != state.bucket {
        return error(StatusCode::NOT_FOUND, "bucket not found");
    }
    match state.objects.lock().unwrap().remove(&object) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND, "no such object"),
    }
}

async fn upload(
    State(state): State<Arc<GcsState>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if bucket != state.bucket {
        return error(StatusCode::NOT_FOUND, "bucket not found");
    }
    if params.get("uploadType").map(String::as_str) != Some("media") {
        return error(StatusCode::BAD_REQUEST, "unsupported upload type");
    }
    let Some(name) = params.get("name").filter(|n| !n.is_empty()) else {
        return error(StatusCode::BAD_REQUEST, "missing object name");
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();

    let size = body.len();
    state
        .objects
        .lock()
        .unwrap()
        .insert(name.clone(), (content_type.clone(), body));
    Json(resource(&state.bucket, name, &content_type, size)).into_response()
}
