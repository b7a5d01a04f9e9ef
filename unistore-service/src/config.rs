//! Backend configuration.
//!
//! [`StorageConfig`] is a serde-tagged enum: the `type` field selects the provider and the
//! remaining fields configure it. Secrets are wrapped in [`SecretBox<ConfigSecret>`] so they
//! never end up in `Debug` output or logs.
//!
//! ```yaml
//! storage:
//!   type: s3compatible
//!   provider: r2
//!   account_id: 0123456789abcdef
//!   bucket: assets
//!   access_key_id: AKIA...
//!   secret_access_key: ...
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Wraps a plain string into a configuration secret.
pub fn secret(value: &str) -> SecretBox<ConfigSecret> {
    SecretBox::new(Box::new(ConfigSecret::from(value)))
}

/// Storage backend configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage backend (type `"filesystem"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: filesystem
    ///   path: /data
    /// ```
    FileSystem {
        /// Directory under which objects are stored.
        ///
        /// Created on first write if it doesn't exist.
        ///
        /// # Environment Variables
        ///
        /// - `UNISTORE__STORAGE__TYPE=filesystem`
        /// - `UNISTORE__STORAGE__PATH=/path/to/storage`
        path: PathBuf,
    },

    /// S3 and S3-compatible object stores (type `"s3compatible"`).
    S3Compatible(S3Config),

    /// Azure Blob Storage (type `"azureblob"`).
    AzureBlob(AzureConfig),

    /// Google Cloud Storage through its JSON API (type `"gcs"`).
    Gcs(GcsConfig),

    /// Synology NAS through the DSM File Station web API (type `"synology"`).
    Synology(SynologyConfig),

    /// Casdoor resource storage (type `"casdoor"`).
    Casdoor(CasdoorConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::FileSystem {
            path: PathBuf::from("data"),
        }
    }
}

/// Vendor presets for [`S3Config`].
///
/// A preset supplies the default endpoint, region and addressing style of the vendor. An
/// explicit [`S3Config::endpoint`] always wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum S3Provider {
    /// Amazon S3.
    #[default]
    Aws,
    /// Cloudflare R2. Requires [`S3Config::account_id`].
    R2,
    /// Alibaba Cloud OSS.
    Aliyun,
    /// Tencent Cloud COS.
    Tencent,
    /// Qiniu Kodo.
    Qiniu,
    /// MinIO or any other self-hosted store. Requires [`S3Config::endpoint`].
    Minio,
}

/// Configuration for [`StorageConfig::S3Compatible`].
///
/// # Example
///
/// ```yaml
/// storage:
///   type: s3compatible
///   provider: aliyun
///   region: cn-hangzhou
///   bucket: my-bucket
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct S3Config {
    /// Vendor preset.
    ///
    /// # Default
    ///
    /// `aws`
    #[serde(default)]
    pub provider: S3Provider,

    /// Bucket name. The bucket must exist.
    pub bucket: String,

    /// Region of the bucket.
    ///
    /// Defaults to `us-east-1` for AWS and `auto` for R2. Required for Aliyun, Tencent and
    /// Qiniu, which derive their endpoint from it.
    #[serde(default)]
    pub region: Option<String>,

    /// Explicit endpoint URL, overriding the preset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Cloudflare account id, used to build the R2 endpoint.
    #[serde(default)]
    pub account_id: Option<String>,

    /// Access key id. Falls back to the environment (`AWS_ACCESS_KEY_ID`) when unset.
    #[serde(default)]
    pub access_key_id: Option<SecretBox<ConfigSecret>>,

    /// Secret access key. Falls back to the environment when unset.
    #[serde(default)]
    pub secret_access_key: Option<SecretBox<ConfigSecret>>,

    /// Key prefix inside the bucket under which all objects live.
    #[serde(default)]
    pub root: Option<String>,

    /// Public base URL (for example a CDN) used by `get_url` instead of pre-signing.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Validity of pre-signed URLs.
    ///
    /// # Default
    ///
    /// `1h`
    #[serde(default = "default_url_expiry", with = "humantime_serde")]
    pub url_expiry: Duration,
}

impl S3Config {
    /// Creates a configuration for `bucket` with all other fields defaulted.
    pub fn new(provider: S3Provider, bucket: impl Into<String>) -> Self {
        Self {
            provider,
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            account_id: None,
            access_key_id: None,
            secret_access_key: None,
            root: None,
            public_url: None,
            url_expiry: default_url_expiry(),
        }
    }

    /// Returns the region, applying the preset default.
    pub fn resolved_region(&self) -> StorageResult<String> {
        if let Some(region) = &self.region {
            return Ok(region.clone());
        }
        match self.provider {
            S3Provider::Aws | S3Provider::Minio => Ok("us-east-1".into()),
            S3Provider::R2 => Ok("auto".into()),
            S3Provider::Aliyun | S3Provider::Tencent | S3Provider::Qiniu => Err(
                StorageError::Config(format!("{:?} storage requires a region", self.provider)),
            ),
        }
    }

    /// Returns the endpoint URL, applying the preset default.
    pub fn resolved_endpoint(&self) -> StorageResult<String> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.trim_end_matches('/').to_owned());
        }

        let endpoint = match self.provider {
            S3Provider::Aws => format!("https://s3.{}.amazonaws.com", self.resolved_region()?),
            S3Provider::R2 => {
                let account = self.account_id.as_deref().ok_or_else(|| {
                    StorageError::Config("r2 storage requires an account_id".into())
                })?;
                format!("https://{account}.r2.cloudflarestorage.com")
            }
            S3Provider::Aliyun => format!("https://oss-{}.aliyuncs.com", self.resolved_region()?),
            S3Provider::Tencent => format!("https://cos.{}.myqcloud.com", self.resolved_region()?),
            S3Provider::Qiniu => format!("https://s3.{}.qiniucs.com", self.resolved_region()?),
            S3Provider::Minio => {
                return Err(StorageError::Config(
                    "minio storage requires an endpoint".into(),
                ));
            }
        };
        Ok(endpoint)
    }

    /// Whether the bucket is addressed as a subdomain of the endpoint.
    ///
    /// Aliyun OSS and Tencent COS reject path-style requests.
    pub fn virtual_host_style(&self) -> bool {
        matches!(self.provider, S3Provider::Aliyun | S3Provider::Tencent)
    }
}

/// Configuration for [`StorageConfig::AzureBlob`].
///
/// # Example
///
/// ```yaml
/// storage:
///   type: azureblob
///   account_name: mystorageaccount
///   account_key: ...
///   container: uploads
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AzureConfig {
    /// Storage account name.
    pub account_name: String,

    /// Shared key of the storage account.
    #[serde(default)]
    pub account_key: Option<SecretBox<ConfigSecret>>,

    /// Container that holds the objects.
    pub container: String,

    /// Explicit endpoint URL.
    ///
    /// # Default
    ///
    /// `https://<account_name>.blob.core.windows.net`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key prefix inside the container.
    #[serde(default)]
    pub root: Option<String>,

    /// Validity of pre-signed URLs.
    #[serde(default = "default_url_expiry", with = "humantime_serde")]
    pub url_expiry: Duration,
}

impl AzureConfig {
    /// Returns the account endpoint.
    pub fn resolved_endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_owned(),
            None => format!("https://{}.blob.core.windows.net", self.account_name),
        }
    }
}

/// Configuration for [`StorageConfig::Gcs`].
///
/// Authentication uses Application Default Credentials unless `credentials` points to a service
/// account key file.
///
/// # Example
///
/// ```yaml
/// storage:
///   type: gcs
///   bucket: my-gcs-bucket
///   predefined_acl: publicRead
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GcsConfig {
    /// Bucket name.
    pub bucket: String,

    /// Optional custom GCS endpoint URL.
    ///
    /// Useful for testing with emulators. Assumes an emulator without authentication if set.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Path to a service account JSON key.
    #[serde(default)]
    pub credentials: Option<PathBuf>,

    /// Predefined ACL applied to uploads, such as `publicRead`.
    #[serde(default)]
    pub predefined_acl: Option<String>,

    /// Base URL for public object links.
    ///
    /// # Default
    ///
    /// `https://storage.googleapis.com`
    #[serde(default)]
    pub public_url: Option<String>,
}

impl GcsConfig {
    /// Creates a configuration for `bucket` with all other fields defaulted.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: None,
            credentials: None,
            predefined_acl: None,
            public_url: None,
        }
    }
}

/// Configuration for [`StorageConfig::Synology`].
///
/// # Example
///
/// ```yaml
/// storage:
///   type: synology
///   endpoint: https://nas.local:5001
///   account: backup
///   password: ...
///   shared_folder: /home
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SynologyConfig {
    /// Base URL of the DSM web interface.
    pub endpoint: String,

    /// DSM account name.
    pub account: String,

    /// DSM password.
    pub password: SecretBox<ConfigSecret>,

    /// One-time password for accounts with 2-step verification.
    #[serde(default)]
    pub otp_code: Option<SecretBox<ConfigSecret>>,

    /// Shared folder that acts as the storage root, such as `/home`.
    pub shared_folder: String,

    /// DSM application scope used for the session and API discovery.
    ///
    /// # Default
    ///
    /// `FileStation`
    #[serde(default = "default_synology_application")]
    pub application: String,

    /// Accept self-signed TLS certificates, which most NAS installations use.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Timeout for each HTTP request.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl SynologyConfig {
    /// Creates a configuration with all optional fields defaulted.
    pub fn new(
        endpoint: impl Into<String>,
        account: impl Into<String>,
        password: &str,
        shared_folder: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            account: account.into(),
            password: secret(password),
            otp_code: None,
            shared_folder: shared_folder.into(),
            application: default_synology_application(),
            accept_invalid_certs: false,
            timeout: default_timeout(),
        }
    }
}

/// Configuration for [`StorageConfig::Casdoor`].
///
/// Files are stored through a Casdoor storage provider. Bucket, path prefix and public domain are
/// read from the provider definition when the backend starts.
///
/// # Example
///
/// ```yaml
/// storage:
///   type: casdoor
///   endpoint: https://door.example.com
///   client_id: ...
///   client_secret: ...
///   organization: built-in
///   application: app-built-in
///   provider: provider_storage_local
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CasdoorConfig {
    /// Base URL of the Casdoor server.
    pub endpoint: String,

    /// Application client id.
    pub client_id: String,

    /// Application client secret.
    pub client_secret: SecretBox<ConfigSecret>,

    /// Organization that owns the resources.
    pub organization: String,

    /// Application name.
    pub application: String,

    /// Name of the storage provider.
    pub provider: String,

    /// Owner recorded on uploaded resources.
    ///
    /// # Default
    ///
    /// `casdoor-oss`
    #[serde(default = "default_casdoor_user")]
    pub user: String,
}

impl CasdoorConfig {
    /// Creates a configuration with all optional fields defaulted.
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: &str,
        organization: impl Into<String>,
        application: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret: secret(client_secret),
            organization: organization.into(),
            application: application.into(),
            provider: provider.into(),
            user: default_casdoor_user(),
        }
    }
}

fn default_url_expiry() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_synology_application() -> String {
    "FileStation".into()
}

fn default_casdoor_user() -> String {
    "casdoor-oss".into()
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn parse(json: serde_json::Value) -> StorageConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn secrets_are_redacted() {
        let config = parse(serde_json::json!({
            "type": "synology",
            "endpoint": "https://nas.local:5001",
            "account": "backup",
            "password": "hunter2",
            "shared_folder": "/home",
        }));

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));

        let StorageConfig::Synology(synology) = config else {
            panic!("expected synology config");
        };
        assert_eq!(synology.password.expose_secret().as_str(), "hunter2");
        assert_eq!(synology.application, "FileStation");
        assert_eq!(synology.timeout, Duration::from_secs(30));
    }

    #[test]
    fn s3_presets() {
        let mut config = S3Config::new(S3Provider::Aws, "b");
        assert_eq!(
            config.resolved_endpoint().unwrap(),
            "https://s3.us-east-1.amazonaws.com"
        );

        config.provider = S3Provider::R2;
        assert!(matches!(
            config.resolved_endpoint(),
            Err(StorageError::Config(_))
        ));
        config.account_id = Some("acc".into());
        assert_eq!(
            config.resolved_endpoint().unwrap(),
            "https://acc.r2.cloudflarestorage.com"
        );
        assert_eq!(config.resolved_region().unwrap(), "auto");

        config.provider = S3Provider::Aliyun;
        config.region = Some("cn-hangzhou".into());
        assert_eq!(
            config.resolved_endpoint().unwrap(),
            "https://oss-cn-hangzhou.aliyuncs.com"
        );
        assert!(config.virtual_host_style());

        config.provider = S3Provider::Tencent;
        config.region = Some("ap-guangzhou".into());
        assert_eq!(
            config.resolved_endpoint().unwrap(),
            "https://cos.ap-guangzhou.myqcloud.com"
        );

        config.provider = S3Provider::Qiniu;
        config.region = Some("cn-east-1".into());
        assert_eq!(
            config.resolved_endpoint().unwrap(),
            "https://s3.cn-east-1.qiniucs.com"
        );
        assert!(!config.virtual_host_style());

        config.endpoint = Some("http://localhost:9000/".into());
        assert_eq!(config.resolved_endpoint().unwrap(), "http://localhost:9000");
    }

    #[test]
    fn parses_s3_with_humantime() {
        let config = parse(serde_json::json!({
            "type": "s3compatible",
            "provider": "minio",
            "endpoint": "http://localhost:9000",
            "bucket": "test",
            "url_expiry": "15m",
        }));
        let StorageConfig::S3Compatible(s3) = config else {
            panic!("expected s3 config");
        };
        assert_eq!(s3.provider, S3Provider::Minio);
        assert_eq!(s3.url_expiry, Duration::from_secs(15 * 60));
    }

    #[test]
    fn azure_default_endpoint() {
        let config = parse(serde_json::json!({
            "type": "azureblob",
            "account_name": "acct",
            "container": "c",
        }));
        let StorageConfig::AzureBlob(azure) = config else {
            panic!("expected azure config");
        };
        assert_eq!(
            azure.resolved_endpoint(),
            "https://acct.blob.core.windows.net"
        );
        assert_eq!(azure.url_expiry, Duration::from_secs(3600));
    }
}
