//! A fake Synology DSM web API.
//!
//! Implements the subset of `SYNO.API.Info`, `SYNO.API.Auth` and `SYNO.FileStation.*` that the
//! synology backend uses, with an in-memory file tree. Sessions can be expired and logins made to
//! fail to exercise error handling.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::server::TestServer;

type Params = Query<HashMap<String, String>>;

/// Error code for an invalid or expired session id.
pub const SESSION_INTERRUPTED: i64 = 119;

#[derive(Debug)]
struct DsmState {
    account: String,
    password: String,
    shared_folder: String,
    list_page_size: usize,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    sessions: Mutex<HashSet<String>>,
    logins: AtomicUsize,
    fail_logins_with: Mutex<Option<i64>>,
    reject_sessions: AtomicBool,
}

/// A running fake DSM server.
#[derive(Debug)]
pub struct FakeDsm {
    server: TestServer,
    state: Arc<DsmState>,
}

impl FakeDsm {
    /// Starts a server that accepts `account`/`password` and exposes `shared_folder`.
    ///
    /// Listings return at most two entries per request so that clients have to page.
    pub fn start(account: &str, password: &str, shared_folder: &str) -> Self {
        let state = Arc::new(DsmState {
            account: account.into(),
            password: password.into(),
            shared_folder: format!("/{}", shared_folder.trim_matches('/')),
            list_page_size: 2,
            files: Mutex::default(),
            sessions: Mutex::default(),
            logins: AtomicUsize::new(0),
            fail_logins_with: Mutex::default(),
            reject_sessions: AtomicBool::new(false),
        });

        let router = Router::new()
            .route("/webapi/query.cgi", get(query))
            .route("/webapi/auth.cgi", get(auth))
            .route("/webapi/entry.cgi", get(entry).post(upload))
            .with_state(state.clone());

        Self {
            server: TestServer::start(router),
            state,
        }
    }

    /// Base URL to configure as the DSM endpoint.
    pub fn endpoint(&self) -> String {
        self.server.base_url()
    }

    /// Number of successful logins so far.
    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    /// Invalidates all sessions, as DSM does after a timeout.
    pub fn expire_sessions(&self) {
        self.state.sessions.lock().unwrap().clear();
    }

    /// Makes every following login fail with `code`.
    pub fn fail_logins_with(&self, code: i64) {
        *self.state.fail_logins_with.lock().unwrap() = Some(code);
    }

    /// Makes File Station reject every session, including freshly created ones.
    pub fn reject_sessions(&self) {
        self.state.reject_sessions.store(true, Ordering::SeqCst);
    }

    /// Returns the contents of the file at an absolute NAS path.
    pub fn file(&self, nas_path: &str) -> Option<Vec<u8>> {
        self.state.files.lock().unwrap().get(nas_path).cloned()
    }

    /// Places a file at an absolute NAS path.
    pub fn insert_file(&self, nas_path: &str, contents: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(nas_path.into(), contents.to_vec());
    }
}

fn failure(code: i64) -> Response {
    Json(json!({ "success": false, "error": { "code": code } })).into_response()
}

fn success(data: Value) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

async fn query(Query(params): Params) -> Response {
    if params.get("api").map(String::as_str) != Some("SYNO.API.Info") {
        return failure(102);
    }

    let api = |path: &str, min: u32, max: u32| {
        json!({ "path": path, "minVersion": min, "maxVersion": max, "requestFormat": "JSON" })
    };
    success(json!({
        "SYNO.API.Auth": api("auth.cgi", 1, 7),
        "SYNO.API.Info": api("query.cgi", 1, 1),
        "SYNO.Core.System": api("entry.cgi", 1, 3),
        "SYNO.FileStation.Download": api("entry.cgi", 1, 2),
        "SYNO.FileStation.Upload": api("entry.cgi", 1, 3),
        "SYNO.FileStation.List": api("entry.cgi", 1, 2),
        "SYNO.FileStation.Delete": api("entry.cgi", 1, 2),
    }))
}

async fn auth(State(state): State<Arc<DsmState>>, Query(params): Params) -> Response {
    let param = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();

    match param("method") {
        "login" => {
            if let Some(code) = *state.fail_logins_with.lock().unwrap() {
                return failure(code);
            }
            if param("account") != state.account || param("passwd") != state.password {
                return failure(400);
            }
            if param("format") != "cookie" || param("enable_syno_token") != "yes" {
                return failure(101);
            }

            let n = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
            let sid = format!("sid-{n}");
            state.sessions.lock().unwrap().insert(sid.clone());
            success(json!({ "sid": sid, "synotoken": format!("token-{n}") }))
        }
        "logout" => {
            state.sessions.lock().unwrap().remove(param("_sid"));
            Json(json!({ "success": true })).into_response()
        }
        _ => failure(103),
    }
}

/// Checks the `_sid` parameter and the matching cookie.
fn authorized(state: &DsmState, params: &HashMap<String, String>, headers: &HeaderMap) -> bool {
    if state.reject_sessions.load(Ordering::SeqCst) {
        return false;
    }
    let Some(sid) = params.get("_sid") else {
        return false;
    };
    let cookie_ok = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains(&format!("id={sid}")));
    cookie_ok && state.sessions.lock().unwrap().contains(sid)
}

async fn entry(
    State(state): State<Arc<DsmState>>,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    if !authorized(&state, &params, &headers) {
        return failure(SESSION_INTERRUPTED);
    }

    let param = |name: &str| params.get(name).cloned().unwrap_or_default();
    match (param("api").as_str(), param("method").as_str()) {
        ("SYNO.FileStation.Download", "download") => {
            match state.files.lock().unwrap().get(&param("path")) {
                Some(contents) => (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    contents.clone(),
                )
                    .into_response(),
                None => failure(408),
            }
        }
        ("SYNO.FileStation.Delete", "delete") => {
            match state.files.lock().unwrap().remove(&param("path")) {
                Some(_) => Json(json!({ "success": true })).into_response(),
                None => failure(408),
            }
        }
        ("SYNO.FileStation.List", "list") => {
            let offset = param("offset").parse().unwrap_or(0);
            let limit = param("limit").parse().unwrap_or(usize::MAX);
            list(&state, &param("folder_path"), offset, limit)
        }
        _ => failure(103),
    }
}

fn list(state: &DsmState, folder: &str, offset: usize, limit: usize) -> Response {
    let files = state.files.lock().unwrap();
    let folder_prefix = format!("{}/", folder.trim_end_matches('/'));
    if folder != state.shared_folder && !files.keys().any(|k| k.starts_with(&folder_prefix)) {
        return failure(408);
    }

    let mut dirs = BTreeSet::new();
    let mut children = Vec::new();
    for (path, contents) in files.iter() {
        let Some(rest) = path.strip_prefix(&folder_prefix) else {
            continue;
        };
        match rest.split_once('/') {
            Some((dir, _)) => {
                dirs.insert(format!("{folder_prefix}{dir}"));
            }
            None => children.push(json!({
                "path": path,
                "name": rest,
                "isdir": false,
                "additional": { "size": contents.len(), "time": { "mtime": 1714564800 } },
            })),
        }
    }

    let mut entries: Vec<Value> = dirs
        .into_iter()
        .map(|dir| {
            let name = dir.rsplit('/').next().unwrap_or_default().to_owned();
            json!({ "path": dir, "name": name, "isdir": true })
        })
        .collect();
    entries.extend(children);

    let total = entries.len();
    let page: Vec<Value> = entries
        .into_iter()
        .skip(offset)
        .take(limit.min(state.list_page_size))
        .collect();
    success(json!({ "total": total, "offset": offset, "files": page }))
}

async fn upload(
    State(state): State<Arc<DsmState>>,
    headers: HeaderMap,
    Query(params): Params,
    mut multipart: Multipart,
) -> Response {
    if !authorized(&state, &params, &headers) {
        return failure(SESSION_INTERRUPTED);
    }
    if params.get("api").map(String::as_str) != Some("SYNO.FileStation.Upload") {
        return failure(103);
    }

    let mut folder = None;
    let mut file = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or_default() {
            "path" => folder = field.text().await.ok(),
            "file" => {
                let name = field.file_name().unwrap_or_default().to_owned();
                let contents = field.bytes().await.unwrap_or_default();
                file = Some((name, contents));
            }
            _ => {}
        }
    }

    let (Some(folder), Some((name, contents))) = (folder, file) else {
        return failure(101);
    };
    if !folder.starts_with(&state.shared_folder) {
        return failure(408);
    }

    let path = format!("{}/{name}", folder.trim_end_matches('/'));
    state.files.lock().unwrap().insert(path, contents.to_vec());
    Json(json!({ "success": true, "data": {} })).into_response()
}
