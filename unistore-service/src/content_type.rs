//! Content type detection for uploads.

use std::borrow::Cow;

use unistore_types::CanonicalPath;

/// Fallback for payloads that cannot be classified.
pub const OCTET_STREAM: &str = "application/octet-stream";

const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Determines the content type of an upload.
///
/// The path extension is consulted first. Without a known extension the payload is sniffed for
/// a magic signature and then checked for valid UTF-8.
pub fn detect(path: &CanonicalPath, contents: &[u8]) -> Cow<'static, str> {
    if let Some(mime) = mime_guess::from_path(path.name()).first_raw() {
        return Cow::Borrowed(mime);
    }

    if let Some(kind) = infer::get(contents) {
        return Cow::Borrowed(kind.mime_type());
    }

    if !contents.is_empty() && std::str::from_utf8(contents).is_ok() {
        return Cow::Borrowed(PLAIN_TEXT);
    }

    Cow::Borrowed(OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn detect_str(path: &str, contents: &[u8]) -> String {
        detect(&CanonicalPath::new(path), contents).into_owned()
    }

    #[test]
    fn extension_wins() {
        assert_eq!(detect_str("a/b.json", b"not json"), "application/json");
        assert_eq!(detect_str("photo.png", b""), "image/png");
    }

    #[test]
    fn sniffs_unknown_extensions() {
        assert_eq!(detect_str("blob", PNG_HEADER), "image/png");
        assert_eq!(detect_str("notes", b"hello"), PLAIN_TEXT);
    }

    #[test]
    fn falls_back_to_octet_stream() {
        assert_eq!(detect_str("blob", &[0x13, 0x37, 0x00, 0xff]), OCTET_STREAM);
        assert_eq!(detect_str("empty", b""), OCTET_STREAM);
    }
}
