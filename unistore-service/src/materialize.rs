//! Turns payload streams into seekable local files.

use std::io::{Seek, SeekFrom};
use std::pin::pin;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::PayloadStream;
use crate::error::{StorageError, StorageResult};

const TEMP_PREFIX: &str = "unistore-";

/// Copies `stream` into a fresh temporary file and rewinds it to offset 0.
///
/// The file name ends in `suffix` (for example `.png`) so tools that sniff by extension keep
/// working. The file is deleted when the returned handle is dropped. On failure the partial file
/// is removed before returning.
#[tracing::instrument(level = "trace", skip(stream))]
pub async fn materialize(stream: PayloadStream, suffix: &str) -> StorageResult<NamedTempFile> {
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(suffix)
        .tempfile()
        .map_err(|e| StorageError::transfer("creating temporary file", e))?;

    let handle = temp
        .as_file()
        .try_clone()
        .map_err(|e| StorageError::transfer("opening temporary file", e))?;
    let mut writer = tokio::fs::File::from_std(handle);
    let mut reader = pin!(StreamReader::new(stream));

    let copied = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|e| StorageError::transfer("copying payload to temporary file", e))?;
    writer
        .flush()
        .await
        .map_err(|e| StorageError::transfer("flushing temporary file", e))?;
    drop(writer);

    temp.as_file_mut()
        .seek(SeekFrom::Start(0))
        .map_err(|e| StorageError::transfer("rewinding temporary file", e))?;

    tracing::debug!(bytes = copied, path = ?temp.path(), "materialized payload");
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bytes::Bytes;
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn writes_and_rewinds() {
        let stream = futures_util::stream::iter([
            Ok(Bytes::from_static(b"oh ")),
            Ok(Bytes::from_static(b"hai!")),
        ])
        .boxed();

        let mut file = materialize(stream, ".txt").await.unwrap();
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("unistore-"));
        assert!(name.ends_with(".txt"));

        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "oh hai!");
    }

    #[tokio::test]
    async fn failed_copy_is_transfer_error() {
        let stream = futures_util::stream::iter([
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("connection reset")),
        ])
        .boxed();

        let err = materialize(stream, "").await.unwrap_err();
        assert!(matches!(err, StorageError::Transfer { .. }));
    }
}
