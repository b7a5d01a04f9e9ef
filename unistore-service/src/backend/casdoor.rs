use std::fmt;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use jiff::Timestamp;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use unistore_types::CanonicalPath;

use super::{Backend, ListPage, ObjectMeta, build_client, reqwest_client, reqwest_error};
use crate::PayloadStream;
use crate::config::{CasdoorConfig, ConfigSecret};
use crate::error::{AuthError, AuthErrorKind, StorageError, StorageResult};

/// Casdoor API response: `{"status": "ok" | "error", "msg": ..., "data": ..., "data2": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
    #[serde(default)]
    data2: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderInfo {
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    path_prefix: String,
    #[serde(default)]
    domain: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    #[serde(default)]
    url: String,
    #[serde(default)]
    created_time: String,
    #[serde(default)]
    file_size: u64,
}

/// Files stored through a Casdoor storage provider.
pub struct CasdoorBackend {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: SecretBox<ConfigSecret>,
    organization: String,
    application: String,
    provider: String,
    user: String,
    /// Public base URL of stored files, without a trailing slash.
    domain: String,
    /// Path component of `domain`, which Casdoor includes in resource names.
    domain_path: String,
    /// `<bucket>/<path prefix>` of the provider.
    prefix: String,
}

impl CasdoorBackend {
    /// Creates a backend and loads the provider's bucket, path prefix and domain.
    pub async fn new(config: CasdoorConfig) -> StorageResult<Self> {
        let client = build_client(reqwest_client())?;
        let endpoint = config.endpoint.trim_end_matches('/').to_owned();

        let mut backend = Self {
            client,
            endpoint,
            client_id: config.client_id,
            client_secret: config.client_secret,
            organization: config.organization,
            application: config.application,
            provider: config.provider,
            user: config.user,
            domain: String::new(),
            domain_path: String::new(),
            prefix: String::new(),
        };

        let id = format!("admin/{}", backend.provider);
        let builder = backend
            .authorized(backend.client.get(backend.api_url("get-provider")))
            .query(&[("id", id.as_str())]);
        let info: ProviderInfo = backend
            .call(builder, "get-provider")
            .await?
            .0
            .ok_or_else(|| {
                StorageError::Config(format!("unknown casdoor provider {}", backend.provider))
            })?;

        backend.domain = info.domain.trim_end_matches('/').to_owned();
        backend.domain_path = url::Url::parse(&backend.domain)
            .map(|url| url.path().trim_matches('/').to_owned())
            .unwrap_or_default();
        backend.prefix = [info.bucket.as_str(), info.path_prefix.as_str()]
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        tracing::debug!(
            domain = %backend.domain,
            prefix = %backend.prefix,
            "Loaded casdoor provider"
        );
        Ok(backend)
    }

    fn api_url(&self, api: &str) -> String {
        format!("{}/api/{api}", self.endpoint)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(
            &self.client_id,
            Some(self.client_secret.expose_secret().as_str()),
        )
    }

    /// Sends a request and unwraps the Casdoor envelope into `(data, data2)`.
    async fn call<T>(
        &self,
        builder: RequestBuilder,
        context: &str,
    ) -> StorageResult<(Option<T>, Option<serde_json::Value>)>
    where
        T: DeserializeOwned,
    {
        let response = builder
            .send()
            .await
            .map_err(|e| reqwest_error(format!("casdoor {context}"), e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StorageError::Auth(AuthError::new(
                AuthErrorKind::InvalidCredentials,
                format!("casdoor {context} failed with {status}"),
            )));
        }
        if !status.is_success() {
            return Err(StorageError::transfer_msg(format!(
                "casdoor {context} failed with {status}"
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| reqwest_error(format!("decoding casdoor {context} response"), e))?;
        if envelope.status != "ok" {
            return Err(StorageError::transfer_msg(format!(
                "casdoor {context}: {}",
                envelope.msg
            )));
        }
        Ok((envelope.data, envelope.data2))
    }

    /// Resource name Casdoor uses for a key: the domain path followed by the key.
    fn resource_name(&self, path: &CanonicalPath) -> String {
        if self.domain_path.is_empty() {
            format!("/{path}")
        } else {
            format!("/{}/{path}", self.domain_path)
        }
    }

    /// Converts a resource URL back into a canonical key.
    fn canonical(&self, url: &str) -> CanonicalPath {
        if let Some(rest) = url.strip_prefix(&self.domain)
            && !self.domain.is_empty()
        {
            return CanonicalPath::new(rest);
        }

        let path = CanonicalPath::new(url);
        for root in [&self.domain_path, &self.prefix] {
            if root.is_empty() {
                continue;
            }
            if let Some(rest) = path.as_str().strip_prefix(root.as_str())
                && (rest.is_empty() || rest.starts_with('/'))
            {
                return CanonicalPath::new(rest);
            }
        }
        path
    }
}

impl fmt::Debug for CasdoorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasdoorBackend")
            .field("endpoint", &self.endpoint)
            .field("organization", &self.organization)
            .field("application", &self.application)
            .field("provider", &self.provider)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Backend for CasdoorBackend {
    fn name(&self) -> &'static str {
        "casdoor"
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn open_read(&self, path: &CanonicalPath) -> StorageResult<Option<PayloadStream>> {
        tracing::debug!("Reading from casdoor backend");
        let url = self.url(path).await?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| reqwest_error("casdoor download", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(StorageError::transfer_msg(format!(
                    "casdoor download {path} failed with {status}"
                )));
            }
            _ => {}
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Some(stream.boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn write(
        &self,
        path: &CanonicalPath,
        content_type: &str,
        contents: Bytes,
    ) -> StorageResult<ObjectMeta> {
        tracing::debug!(size = contents.len(), "Writing to casdoor backend");
        let size = contents.len() as u64;

        let file = Part::bytes(Vec::from(contents))
            .file_name(path.name().to_owned())
            .mime_str(content_type)
            .map_err(|e| reqwest_error("casdoor upload content type", e))?;

        let builder = self
            .authorized(self.client.post(self.api_url("upload-resource")))
            .query(&[
                ("owner", self.organization.as_str()),
                ("user", self.user.as_str()),
                ("application", self.application.as_str()),
                ("tag", ""),
                ("parent", ""),
                ("fullFilePath", path.as_str()),
                ("provider", self.provider.as_str()),
            ])
            .multipart(Form::new().part("file", file));

        let (url, _name) = self.call::<String>(builder, "upload-resource").await?;
        let stored = url.map_or_else(|| path.clone(), |url| self.canonical(&url));

        Ok(ObjectMeta {
            path: stored,
            size,
            last_modified: Some(Timestamp::now()),
        })
    }

    #[tracing::instrument(level = "trace", fields(?path), skip_all)]
    async fn delete(&self, path: &CanonicalPath) -> StorageResult<()> {
        tracing::debug!("Deleting from casdoor backend");
        let body = serde_json::json!({
            "owner": self.organization,
            "name": self.resource_name(path),
            "application": self.application,
            "provider": self.provider,
        });

        let builder = self
            .authorized(self.client.post(self.api_url("delete-resource")))
            .json(&body);
        let (affected, _) = self.call::<String>(builder, "delete-resource").await?;

        match affected.as_deref() {
            Some("Unaffected") => Err(StorageError::not_found(path)),
            _ => Ok(()),
        }
    }

    #[tracing::instrument(level = "trace", fields(?prefix), skip_all)]
    async fn list_page(
        &self,
        prefix: &CanonicalPath,
        _token: Option<String>,
    ) -> StorageResult<ListPage> {
        let builder = self
            .authorized(self.client.get(self.api_url("get-resources")))
            .query(&[
                ("owner", self.organization.as_str()),
                ("user", self.user.as_str()),
                ("field", "provider"),
                ("value", self.provider.as_str()),
            ]);
        let (resources, _) = self.call::<Vec<Resource>>(builder, "get-resources").await?;

        let entries = resources
            .unwrap_or_default()
            .into_iter()
            .map(|resource| ObjectMeta {
                path: self.canonical(&resource.url),
                size: resource.file_size,
                last_modified: resource.created_time.parse::<Timestamp>().ok(),
            })
            .filter(|meta| meta.path.matches_prefix(prefix))
            .collect();

        Ok(ListPage {
            entries,
            next: None,
        })
    }

    async fn url(&self, path: &CanonicalPath) -> StorageResult<String> {
        Ok(format!("{}/{path}", self.domain))
    }
}
