use opendal::{Operator, services};
use secrecy::ExposeSecret;

use super::OpendalBackend;
use crate::config::S3Config;
use crate::error::{StorageError, StorageResult};

/// Creates an S3-compatible backend for AWS S3, Cloudflare R2, Aliyun OSS, Tencent COS, Qiniu
/// Kodo or MinIO.
pub fn s3_compatible(config: &S3Config) -> StorageResult<OpendalBackend> {
    let endpoint = config.resolved_endpoint()?;
    let region = config.resolved_region()?;

    let mut builder = services::S3::default()
        .bucket(&config.bucket)
        .region(&region)
        .endpoint(&endpoint);

    if let Some(key) = &config.access_key_id {
        builder = builder.access_key_id(key.expose_secret());
    }
    if let Some(secret) = &config.secret_access_key {
        builder = builder.secret_access_key(secret.expose_secret());
    }
    if let Some(root) = &config.root {
        builder = builder.root(root);
    }
    if config.virtual_host_style() {
        builder = builder.enable_virtual_host_style();
    }

    let operator = Operator::new(builder)
        .map(|op| op.finish())
        .map_err(|e| StorageError::Config(e.to_string()))?;

    tracing::debug!(%endpoint, bucket = %config.bucket, "Created s3-compatible backend");
    Ok(OpendalBackend::new(
        "s3-compatible",
        operator,
        endpoint,
        config.public_url.clone(),
        config.url_expiry,
    ))
}

#[cfg(test)]
mod tests {
    use unistore_types::CanonicalPath;

    use super::*;
    use crate::backend::Backend;
    use crate::config::S3Provider;

    #[tokio::test]
    async fn public_url_bypasses_presigning() {
        let mut config = S3Config::new(S3Provider::Minio, "bucket");
        config.endpoint = Some("http://localhost:9000".into());
        config.public_url = Some("https://cdn.example.com/".into());

        let backend = s3_compatible(&config).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:9000");
        assert_eq!(
            backend.url(&CanonicalPath::new("a/b.png")).await.unwrap(),
            "https://cdn.example.com/a/b.png"
        );
    }

    #[test]
    fn minio_requires_endpoint() {
        let config = S3Config::new(S3Provider::Minio, "bucket");
        assert!(matches!(
            s3_compatible(&config),
            Err(StorageError::Config(_))
        ));
    }
}
