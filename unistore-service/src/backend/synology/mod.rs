//! Synology NAS through the DSM File Station web API.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use jiff::Timestamp;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::IgnoredAny;
use unistore_types::CanonicalPath;

use self::error::{ApiFamily, Envelope};
use self::session::{ApiTarget, Session, SessionManager};
use super::{Backend, ListPage, ObjectMeta, build_client, reqwest_client, reqwest_error};
use crate::PayloadStream;
use crate::config::SynologyConfig;
use crate::error::{StorageError, StorageResult};

mod error;
mod session;

pub use session::SessionState;

const DOWNLOAD_API: &str = "SYNO.FileStation.Download";
const UPLOAD_API: &str = "SYNO.FileStation.Upload";
const LIST_API: &str = "SYNO.FileStation.List";
const DELETE_API: &str = "SYNO.FileStation.Delete";
const FILE_STATION_VERSION: u32 = 2;

/// Number of entries requested per `list` call.
const LIST_PAGE_SIZE: u64 = 1000;

/// Synology NAS storage rooted at a shared folder.
#[derive(Debug)]
pub struct SynologyBackend {
    session: SessionManager,
    endpoint: String,
    shared_folder: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    path: String,
    #[serde(default)]
    isdir: bool,
    #[serde(default)]
    additional: Option<FileAdditional>,
}

#[derive(Debug, Deserialize)]
struct FileAdditional {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    time: Option<FileTime>,
}

#[derive(Debug, Deserialize)]
struct FileTime {
    mtime: i64,
}

impl SynologyBackend {
    /// Creates a backend. No request is made until the first operation.
    pub fn new(config: SynologyConfig) -> StorageResult<Self> {
        let client = build_client(
            reqwest_client()
                .timeout(config.timeout)
                .danger_accept_invalid_certs(config.accept_invalid_certs),
        )?;

        let endpoint = config.endpoint.trim_end_matches('/').to_owned();
        let shared_folder = format!("/{}", config.shared_folder.trim_matches('/'));

        let session = SessionManager::new(
            client,
            endpoint.clone(),
            config.account,
            config.password,
            config.otp_code,
            config.application,
        );

        Ok(Self {
            session,
            endpoint,
            shared_folder,
        })
    }

    /// Reports the state of the DSM session.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Marks the session as expired so that the next operation logs in again.
    pub async fn expire_session(&self) {
        self.session.invalidate().await;
    }

    /// Maps a canonical key onto an absolute NAS path inside the shared folder.
    fn nas_path(&self, path: &str) -> String {
        if path.is_empty() {
            self.shared_folder.clone()
        } else {
            format!("{}/{path}", self.shared_folder)
        }
    }

    /// Maps an absolute NAS path back to a canonical key.
    fn canonical(&self, nas_path: &str) -> CanonicalPath {
        match nas_path.strip_prefix(&self.shared_folder) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => CanonicalPath::new(rest),
            // Not below the configured root: drop the leading shared folder segment.
            _ => {
                let trimmed = nas_path.trim_start_matches('/');
                let rest = trimmed.split_once('/').map_or("", |(_, rest)| rest);
                CanonicalPath::new(rest)
            }
        }
    }

    /// Runs `op` with an active session, logging in again and retrying once if DSM rejects the
    /// session.
    async fn with_session<T, F, Fut>(&self, op: F) -> StorageResult<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let session = self.session.ensure_active().await?;
        match op(session).await {
            Err(StorageError::Auth(err)) => {
                tracing::info!(error = %err, "DSM rejected the session, logging in again");
                self.session.invalidate().await;
                let session = self.session.ensure_active().await?;
                op(session).await
            }
            result => result,
        }
    }

    fn request(
        &self,
        session: &Session,
        method: reqwest::Method,
        api: &ApiTarget,
        api_method: &str,
    ) -> reqwest::RequestBuilder {
        let version = api.version.to_string();
        let builder = self
            .session
            .client()
            .request(method, self.session.cgi_url(&api.path))
            .query(&[
                ("api", api.name),
                ("version", version.as_str()),
                ("method", api_method),
            ]);
        session.sign(builder)
    }

    async fn download(
        &self,
        session: Arc<Session>,
        path: &CanonicalPath,
    ) -> StorageResult<Option<PayloadStream>> {
        let api = session.api(DOWNLOAD_API, FILE_STATION_VERSION)?;
        let response = self
            .request(&session, reqwest::Method::GET, &api, "download")
            .query(&[("path", self.nas_path(path.as_str())), ("mode", "download".into())])
            .send()
            .await
            .map_err(|e| reqwest_error("dsm download", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(&response, "download"));
        }

        // Errors come back as a JSON envelope instead of the file body. A stored JSON file
        // looks the same on the wire, so only a failed envelope counts as an error.
        if is_json(&response) {
            let body = response
                .bytes()
                .await
                .map_err(|e| reqwest_error("dsm download", e))?;
            if let Ok(envelope) = serde_json::from_slice::<Envelope<serde_json::Value>>(&body)
                && !envelope.success
            {
                let result = envelope.into_result(ApiFamily::FileStation, "download", Some(path));
                return match result {
                    Err(StorageError::NotFound { .. }) => Ok(None),
                    other => other.map(|_| None),
                };
            }
            return Ok(Some(crate::stream::from_bytes(body)));
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Some(stream.boxed()))
    }

    async fn upload(
        &self,
        session: Arc<Session>,
        path: &CanonicalPath,
        content_type: &str,
        contents: Bytes,
    ) -> StorageResult<()> {
        let api = session.api(UPLOAD_API, FILE_STATION_VERSION)?;

        let file = Part::bytes(Vec::from(contents))
            .file_name(path.name().to_owned())
            .mime_str(content_type)
            .map_err(|e| reqwest_error("dsm upload content type", e))?;
        let form = Form::new()
            .text("path", self.nas_path(path.parent()))
            .text("create_parents", "true")
            .text("overwrite", "true")
            .part("file", file);

        let response = self
            .request(&session, reqwest::Method::POST, &api, "upload")
            .multipart(form)
            .send()
            .await
            .map_err(|e| reqwest_error("dsm upload", e))?;

        decode::<IgnoredAny>(response, "upload", Some(path)).await?;
        Ok(())
    }

    async fn remove(&self, session: Arc<Session>, path: &CanonicalPath) -> StorageResult<()> {
        let api = session.api(DELETE_API, FILE_STATION_VERSION)?;
        let response = self
            .request(&session, reqwest::Method::GET, &api, "delete")
            .query(&[("path", self.nas_path(path.as_str()))])
            .send()
            .await
            .map_err(|e| reqwest_error("dsm delete", e))?;

        decode::<IgnoredAny>(response, "delete", Some(path)).await?;
        Ok(())
    }

    /// Lists one folder, following `offset`/`limit` pages until `total` entries were seen.
    async fn list_folder(&self, session: &Session, folder: &str) -> StorageResult<Vec<FileEntry>> {
        let api = session.api(LIST_API, FILE_STATION_VERSION)?;
        let folder_path = self.canonical(folder);
        let mut entries = Vec::new();
        let mut offset = 0;

        loop {
            let response = self
                .request(session, reqwest::Method::GET, &api, "list")
                .query(&[
                    ("folder_path", folder.to_owned()),
                    ("offset", offset.to_string()),
                    ("limit", LIST_PAGE_SIZE.to_string()),
                    ("additional", r#"["size","time"]"#.to_owned()),
                ])
                .send()
                .await
                .map_err(|e| reqwest_error("dsm list", e))?;

            let page: FileList = match decode(response, "list", Some(&folder_path)).await {
                Ok(data) => data.unwrap_or(FileList {
                    total: 0,
                    files: Vec::new(),
                }),
                // The folder does not exist, so nothing can match.
                Err(StorageError::NotFound { .. }) => break,
                Err(err) => return Err(err),
            };

            let received = page.files.len() as u64;
            offset += received;
            entries.extend(page.files);
            if received == 0 || offset >= page.total {
                break;
            }
        }

        Ok(entries)
    }

    async fn walk(&self, session: Arc<Session>, prefix: &CanonicalPath) -> StorageResult<ListPage> {
        let mut entries = Vec::new();
        let mut pending = vec![self.nas_path(prefix.parent())];

        while let Some(folder) = pending.pop() {
            for entry in self.list_folder(&session, &folder).await? {
                let path = self.canonical(&entry.path);
                if entry.isdir {
                    let dir = format!("{path}/");
                    if dir.starts_with(prefix.as_str()) || prefix.as_str().starts_with(&dir) {
                        pending.push(entry.path);
                    }
                } else if path.matches_prefix(prefix) {
                    let additional = entry.additional.unwrap_or(FileAdditional {
                        size: None,
                        time: None,
                    });
                    entries.push(ObjectMeta {
                        path,
                        size: additional.size.unwrap_or(0),
                        last_modified: additional
                            .time
                            .and_then(|t| Timestamp::from_second(t.mtime).ok()),
                    });
                }
            }
        }

        Ok(ListPage {
            entries,
            next: None,
        })
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/json"))
}

fn status_error(response: &Response, context: &str) -> StorageError {
    let status = response.status();
    let message = format!("dsm {context} failed with {status}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StorageError::retryable(message)
    } else {
        StorageError::transfer_msg(message)
    }
}

/// Decodes a File Station envelope, keeping its payload.
async fn decode<T>(
    response: Response,
    context: &str,
    path: Option<&CanonicalPath>,
) -> StorageResult<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !response.status().is_success() {
        return Err(status_error(&response, context));
    }

    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| reqwest_error(format!("decoding dsm {context} response"), e))?;
    envelope.into_result(ApiFamily::FileStation, context, path)
}

#[async_trait::async_trait]
impl Backend for SynologyBackend {
    fn name(&self) -> &'static str {
        "synology"
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>> {
        tracing::debug!("Reading from synology backend");
        self.with_session(|session| self.download(session, path))
            .await
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn write(
        &self,
        path: &CanonicalPath,
        content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta> {
        tracing::debug!(size = contents.len(), "Writing to synology backend");
        let size = contents.len() as u64;
        self.with_session(|session| self.upload(session, path, content_type, contents.clone()))
            .await?;

        Ok(ObjectMeta {
            path: path.clone(),
            size,
            last_modified: Some(Timestamp::now()),
        })
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()> {
        tracing::debug!("Deleting from synology backend");
        self.with_session(|session| self.remove(session, path)).await
    }

    #[tracing::instrument(level = "trace", fields(?prefix), skip_all)]
    async fn list_page(
        &self,
        prefix: &CanonicalPath,
        _token: Option<String>,
    ) -> StorageResult<ListPage> {
        self.with_session(|session| self.walk(session, prefix)).await
    }

    async fn url(&self, path: &CanonicalPath) -> StorageResult<String> {
        let session = self.session.ensure_active().await?;
        let api = session.api(DOWNLOAD_API, FILE_STATION_VERSION)?;
        let version = api.version.to_string();
        let nas_path = self.nas_path(path.as_str());

        let mut params = vec![
            ("api", api.name),
            ("version", version.as_str()),
            ("method", "download"),
            ("path", nas_path.as_str()),
            ("mode", "download"),
        ];
        params.extend(session.query_params());

        let url = url::Url::parse_with_params(&self.session.cgi_url(&api.path), &params)
            .map_err(|e| StorageError::transfer("building dsm download url", e))?;
        Ok(url.into())
    }

    async fn shutdown(&self) -> StorageResult<()> {
        self.session.logout().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(shared_folder: &str) -> SynologyBackend {
        SynologyBackend::new(SynologyConfig::new(
            "https://nas.invalid:5001/",
            "user",
            "pw",
            shared_folder,
        ))
        .unwrap()
    }

    #[test]
    fn folds_shared_folder_into_paths() {
        let backend = backend("home/");
        assert_eq!(backend.nas_path("a/b.txt"), "/home/a/b.txt");
        assert_eq!(backend.nas_path(""), "/home");
        assert_eq!(backend.endpoint(), "https://nas.invalid:5001");
    }

    #[test]
    fn strips_shared_folder_from_results() {
        let backend = backend("/home");
        assert_eq!(backend.canonical("/home/a/b.txt").as_str(), "a/b.txt");
        assert_eq!(backend.canonical("/homework/x").as_str(), "x");
        assert_eq!(backend.canonical("/photo/2024/x.jpg").as_str(), "2024/x.jpg");
    }

    #[test]
    fn lazily_logs_in() {
        assert_eq!(backend("/home").session_state(), SessionState::LoggedOut);
    }
}
