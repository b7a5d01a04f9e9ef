use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use jiff::Timestamp;
use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use unistore_types::CanonicalPath;

use super::{Backend, ListPage, ObjectMeta, build_client, reqwest_client, reqwest_error};
use crate::PayloadStream;
use crate::config::GcsConfig;
use crate::error::{AuthError, AuthErrorKind, StorageError, StorageResult};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const TOKEN_SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

/// Object names travel as a single path segment in the JSON API.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Public links keep `/` between segments.
const PUBLIC_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Google Cloud Storage through the JSON API.
pub struct GcsBackend {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    public_url: String,
    predefined_acl: Option<String>,
    token_provider: Option<Arc<dyn gcp_auth::TokenProvider>>,
}

/// Object resource as returned by the JSON API. `size` is a decimal string.
#[derive(Debug, Deserialize)]
struct GcsObject {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

impl GcsObject {
    fn into_meta(self) -> ObjectMeta {
        ObjectMeta {
            path: CanonicalPath::new(&self.name),
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            last_modified: self.updated.and_then(|u| u.parse::<Timestamp>().ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObjectList {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl GcsBackend {
    /// Creates a backend for `config.bucket`.
    ///
    /// With a custom endpoint the backend assumes an emulator and sends no credentials.
    pub async fn new(config: GcsConfig) -> StorageResult<Self> {
        let token_provider: Option<Arc<dyn gcp_auth::TokenProvider>> = match (
            &config.endpoint,
            &config.credentials,
        ) {
            (Some(_), _) => None,
            (None, Some(path)) => {
                let account = gcp_auth::CustomServiceAccount::from_file(path)
                    .map_err(|e| StorageError::Config(format!("invalid gcs credentials: {e}")))?;
                let provider: Arc<dyn gcp_auth::TokenProvider> = Arc::new(account);
                Some(provider)
            }
            (None, None) => Some(
                gcp_auth::provider()
                    .await
                    .map_err(|e| StorageError::Config(format!("no gcs credentials: {e}")))?,
            ),
        };

        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_owned();
        let public_url = config
            .public_url
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_owned();

        Ok(Self {
            client: build_client(reqwest_client())?,
            endpoint,
            bucket: config.bucket,
            public_url,
            predefined_acl: config.predefined_acl,
            token_provider,
        })
    }

    fn object_url(&self, path: &CanonicalPath) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            self.bucket,
            utf8_percent_encode(path.as_str(), OBJECT_NAME)
        )
    }

    async fn authorize(&self, builder: RequestBuilder) -> StorageResult<RequestBuilder> {
        let Some(provider) = &self.token_provider else {
            return Ok(builder);
        };

        let token = provider.token(TOKEN_SCOPES).await.map_err(|e| {
            StorageError::Auth(AuthError::new(AuthErrorKind::Unavailable, e.to_string()))
        })?;
        Ok(builder.bearer_auth(token.as_str()))
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> StorageResult<Response> {
        self.authorize(builder)
            .await?
            .send()
            .await
            .map_err(|e| reqwest_error(format!("gcs {context}"), e))
    }
}

/// Converts an unsuccessful response into a [`StorageError`], keeping the response body as
/// context.
async fn status_error(response: Response, context: &str, path: &CanonicalPath) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("gcs {context} {path} failed with {status}: {body}");

    match status {
        StatusCode::NOT_FOUND => StorageError::not_found(path),
        StatusCode::UNAUTHORIZED => {
            StorageError::Auth(AuthError::new(AuthErrorKind::InvalidCredentials, message))
        }
        StatusCode::FORBIDDEN => {
            StorageError::Auth(AuthError::new(AuthErrorKind::PermissionDenied, message))
        }
        StatusCode::TOO_MANY_REQUESTS => StorageError::retryable(message),
        status if status.is_server_error() => StorageError::retryable(message),
        _ => StorageError::transfer_msg(message),
    }
}

impl fmt::Debug for GcsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsBackend")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("authenticated", &self.token_provider.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Backend for GcsBackend {
    fn name(&self) -> &'static str {
        "gcs"
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>> {
        tracing::debug!("Reading from gcs backend");
        let builder = self
            .client
            .get(self.object_url(path))
            .query(&[("alt", "media")]);
        let response = self.send(builder, "download").await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Object not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response, "download", path).await);
        }

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Some(stream.boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn write(
        &self,
        path: &CanonicalPath,
        content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta> {
        tracing::debug!(size = contents.len(), "Writing to gcs backend");
        let size = contents.len() as u64;

        let url = format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket);
        let mut query = vec![("uploadType", "media"), ("name", path.as_str())];
        if let Some(acl) = &self.predefined_acl {
            query.push(("predefinedAcl", acl.as_str()));
        }

        let builder = self
            .client
            .post(url)
            .query(&query)
            .header(header::CONTENT_TYPE, content_type)
            .body(contents);
        let response = self.send(builder, "upload").await?;
        if !response.status().is_success() {
            return Err(status_error(response, "upload", path).await);
        }

        let object: GcsObject = response
            .json()
            .await
            .map_err(|e| reqwest_error("decoding gcs upload response", e))?;
        let mut meta = object.into_meta();
        if meta.size == 0 {
            meta.size = size;
        }
        Ok(meta)
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()> {
        tracing::debug!("Deleting from gcs backend");
        let builder = self.client.delete(self.object_url(path));
        let response = self.send(builder, "delete").await?;
        if !response.status().is_success() {
            return Err(status_error(response, "delete", path).await);
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?prefix, has_token = token.is_some()), skip_all)]
    async fn list_page(
        &self,
        prefix: &CanonicalPath,
        token: Option<String>,
    ) -> StorageResult<ListPage> {
        let url = format!("{}/storage/v1/b/{}/o", self.endpoint, self.bucket);
        let mut query = vec![("prefix", prefix.as_str())];
        if let Some(token) = &token {
            query.push(("pageToken", token.as_str()));
        }

        let builder = self.client.get(url).query(&query);
        let response = self.send(builder, "list").await?;
        if !response.status().is_success() {
            return Err(status_error(response, "list", prefix).await);
        }

        let list: GcsObjectList = response
            .json()
            .await
            .map_err(|e| reqwest_error("decoding gcs listing", e))?;

        Ok(ListPage {
            entries: list.items.into_iter().map(GcsObject::into_meta).collect(),
            next: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn url(&self, path: &CanonicalPath) -> StorageResult<String> {
        Ok(format!(
            "{}/{}/{}",
            self.public_url,
            self.bucket,
            utf8_percent_encode(path.as_str(), PUBLIC_PATH)
        ))
    }
}
