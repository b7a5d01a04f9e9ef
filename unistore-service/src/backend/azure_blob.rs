use opendal::{Operator, services};
use secrecy::ExposeSecret;

use super::OpendalBackend;
use crate::config::AzureConfig;
use crate::error::{StorageError, StorageResult};

/// Creates an Azure Blob Storage backend.
///
/// The reported endpoint includes the container, matching the URL under which blobs are served.
pub fn azure_blob(config: &AzureConfig) -> StorageResult<OpendalBackend> {
    let account_endpoint = config.resolved_endpoint();

    let mut builder = services::Azblob::default()
        .account_name(&config.account_name)
        .container(&config.container)
        .endpoint(&account_endpoint);

    if let Some(key) = &config.account_key {
        builder = builder.account_key(key.expose_secret());
    }
    if let Some(root) = &config.root {
        builder = builder.root(root);
    }

    let operator = Operator::new(builder)
        .map(|op| op.finish())
        .map_err(|e| StorageError::Config(e.to_string()))?;

    let endpoint = format!("{account_endpoint}/{}", config.container);
    tracing::debug!(%endpoint, "Created azure blob backend");
    Ok(OpendalBackend::new(
        "azure-blob",
        operator,
        endpoint,
        None,
        config.url_expiry,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    #[test]
    fn endpoint_includes_container() {
        let config: AzureConfig = serde_json::from_value(serde_json::json!({
            "account_name": "acct",
            "container": "uploads",
        }))
        .unwrap();

        let backend = azure_blob(&config).unwrap();
        assert_eq!(
            backend.endpoint(),
            "https://acct.blob.core.windows.net/uploads"
        );
    }
}
