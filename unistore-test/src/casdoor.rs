//! A fake Casdoor server with one storage provider.
//!
//! Stored files are served below `/cdn/` on the same server, which doubles as the provider's
//! public domain.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Basic;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::server::TestServer;

type Params = Query<HashMap<String, String>>;
type Credentials = Option<TypedHeader<Authorization<Basic>>>;

#[derive(Debug)]
struct CasdoorState {
    client_id: String,
    client_secret: String,
    provider: String,
    files: Mutex<BTreeMap<String, Bytes>>,
}

impl CasdoorState {
    fn authorized(&self, credentials: &Credentials) -> bool {
        credentials.as_ref().is_some_and(|TypedHeader(auth)| {
            auth.username() == self.client_id && auth.password() == self.client_secret
        })
    }
}

/// A running fake Casdoor server.
#[derive(Debug)]
pub struct FakeCasdoor {
    server: TestServer,
    state: Arc<CasdoorState>,
}

impl FakeCasdoor {
    /// Starts a server that accepts the given application credentials for `provider`.
    pub fn start(client_id: &str, client_secret: &str, provider: &str) -> Self {
        let state = Arc::new(CasdoorState {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            provider: provider.into(),
            files: Mutex::default(),
        });

        let router = Router::new()
            .route("/api/get-provider", get(get_provider))
            .route("/api/upload-resource", post(upload_resource))
            .route("/api/get-resources", get(get_resources))
            .route("/api/delete-resource", post(delete_resource))
            .route("/cdn/{*path}", get(serve_file))
            .with_state(state.clone());

        Self {
            server: TestServer::start(router),
            state,
        }
    }

    /// Base URL to configure as the Casdoor endpoint.
    pub fn endpoint(&self) -> String {
        self.server.base_url()
    }

    /// Public URL of a stored file.
    pub fn file_url(&self, key: &str) -> String {
        self.server.url(&format!("cdn/{key}"))
    }

    /// Returns the contents stored under `key`.
    pub fn file(&self, key: &str) -> Option<Vec<u8>> {
        self.state.files.lock().unwrap().get(key).map(|b| b.to_vec())
    }

    /// Stores a file directly.
    pub fn insert_file(&self, key: &str, contents: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(key.into(), Bytes::copy_from_slice(contents));
    }
}

fn ok(data: Value) -> Response {
    Json(json!({ "status": "ok", "msg": "", "data": data, "data2": null })).into_response()
}

fn err(msg: &str) -> Response {
    Json(json!({ "status": "error", "msg": msg, "data": null, "data2": null })).into_response()
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "invalid client credentials").into_response()
}

/// The provider's domain is this server's `/cdn/`, as seen by the client.
fn domain(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}/cdn/")
}

async fn get_provider(
    State(state): State<Arc<CasdoorState>>,
    credentials: Credentials,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    if !state.authorized(&credentials) {
        return unauthorized();
    }
    if params.get("id") != Some(&format!("admin/{}", state.provider)) {
        return ok(Value::Null);
    }

    ok(json!({
        "owner": "admin",
        "name": state.provider,
        "category": "Storage",
        "type": "Local File System",
        "bucket": "bucket",
        "pathPrefix": "files",
        "domain": domain(&headers),
    }))
}

async fn upload_resource(
    State(state): State<Arc<CasdoorState>>,
    credentials: Credentials,
    headers: HeaderMap,
    Query(params): Params,
    mut multipart: Multipart,
) -> Response {
    if !state.authorized(&credentials) {
        return unauthorized();
    }
    if params.get("provider") != Some(&state.provider) {
        return err("provider not found");
    }
    let Some(key) = params
        .get("fullFilePath")
        .map(|p| p.trim_start_matches('/').to_owned())
        .filter(|p| !p.is_empty())
    else {
        return err("missing fullFilePath");
    };

    let mut contents = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            contents = field.bytes().await.ok();
        }
    }
    let Some(contents) = contents else {
        return err("missing file");
    };

    state.files.lock().unwrap().insert(key.clone(), contents);
    let url = format!("{}{key}", domain(&headers));
    Json(json!({ "status": "ok", "msg": "", "data": url, "data2": key })).into_response()
}

async fn get_resources(
    State(state): State<Arc<CasdoorState>>,
    credentials: Credentials,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    if !state.authorized(&credentials) {
        return unauthorized();
    }

    let domain = domain(&headers);
    let files = state.files.lock().unwrap();
    let resources: Vec<Value> = files
        .iter()
        .filter(|_| params.get("value") == Some(&state.provider))
        .map(|(key, contents)| {
            json!({
                "owner": params.get("owner"),
                "name": format!("/cdn/{key}"),
                "createdTime": "2024-05-01T12:00:00+08:00",
                "provider": state.provider,
                "fileSize": contents.len(),
                "url": format!("{domain}{key}"),
            })
        })
        .collect();
    ok(Value::Array(resources))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    name: String,
    provider: String,
}

async fn delete_resource(
    State(state): State<Arc<CasdoorState>>,
    credentials: Credentials,
    Json(request): Json<DeleteRequest>,
) -> Response {
    if !state.authorized(&credentials) {
        return unauthorized();
    }
    if request.provider != state.provider {
        return err("provider not found");
    }

    let key = request.name.trim_start_matches("/cdn/");
    match state.files.lock().unwrap().remove(key) {
        Some(_) => ok(json!("Affected")),
        None => ok(json!("Unaffected")),
    }
}

async fn serve_file(State(state): State<Arc<CasdoorState>>, Path(path): Path<String>) -> Response {
    match state.files.lock().unwrap().get(&path) {
        Some(contents) => contents.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
