//! Payload stream type and helpers.

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Type alias for data streams used in service APIs.
pub type PayloadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Creates a single-chunk [`PayloadStream`] from in-memory bytes.
pub fn from_bytes(contents: impl Into<Bytes>) -> PayloadStream {
    let bytes = contents.into();
    futures_util::stream::once(async move { Ok(bytes) }).boxed()
}

/// Wraps an [`AsyncRead`] into a [`PayloadStream`].
pub fn from_reader<R>(reader: R) -> PayloadStream
where
    R: AsyncRead + Send + 'static,
{
    ReaderStream::new(reader).boxed()
}

/// Drains a [`PayloadStream`] into a single buffer.
pub async fn collect(stream: PayloadStream) -> std::io::Result<Bytes> {
    let bytes: BytesMut = stream.try_collect().await?;
    Ok(bytes.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_all_chunks() {
        let stream = futures_util::stream::iter([
            Ok(Bytes::from_static(b"oh ")),
            Ok(Bytes::from_static(b"hai!")),
        ])
        .boxed();
        assert_eq!(collect(stream).await.unwrap().as_ref(), b"oh hai!");
    }

    #[tokio::test]
    async fn reads_from_reader() {
        let stream = from_reader(&b"oh hai!"[..]);
        assert_eq!(collect(stream).await.unwrap().as_ref(), b"oh hai!");
    }
}
