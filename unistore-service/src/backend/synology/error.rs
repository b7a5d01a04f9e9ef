//! DSM response envelopes and error codes.

use serde::Deserialize;
use unistore_types::CanonicalPath;

use crate::error::{AuthError, AuthErrorKind, StorageError, StorageResult};

/// `{"success": true, "data": ...}` or `{"success": false, "error": {"code": ...}}`.
#[derive(Debug, Deserialize)]
pub(super) struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    pub code: i64,
}

/// Which DSM code table applies. Codes 400 and above mean different things per API family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ApiFamily {
    Auth,
    FileStation,
}

impl<T> Envelope<T> {
    /// Returns the payload of a successful response or decodes the error code.
    pub fn into_result(
        self,
        family: ApiFamily,
        context: &str,
        path: Option<&CanonicalPath>,
    ) -> StorageResult<Option<T>> {
        if self.success {
            return Ok(self.data);
        }

        match self.error {
            Some(error) => Err(decode_error(error.code, family, context, path)),
            None => Err(StorageError::transfer_msg(format!(
                "dsm {context} failed without an error code"
            ))),
        }
    }
}

/// Maps a DSM error code to a [`StorageError`].
pub(super) fn decode_error(
    code: i64,
    family: ApiFamily,
    context: &str,
    path: Option<&CanonicalPath>,
) -> StorageError {
    let auth = |kind: AuthErrorKind, message: &str| {
        let error = AuthError::new(kind, format!("dsm {context}: {message}"));
        StorageError::Auth(error.with_code(code))
    };

    match (family, code) {
        (_, 102..=104) => StorageError::NotSupported {
            backend: "synology",
            operation: format!("{context} (code {code})"),
        },
        (_, 105) => auth(AuthErrorKind::PermissionDenied, "permission denied"),
        (_, 106 | 107 | 119) => auth(AuthErrorKind::SessionExpired, "session expired"),
        (_, 109..=111) => StorageError::retryable(format!("dsm {context}: busy (code {code})")),

        (ApiFamily::Auth, 400) => {
            auth(AuthErrorKind::InvalidCredentials, "no such account or wrong password")
        }
        (ApiFamily::Auth, 401) => auth(AuthErrorKind::Unavailable, "account disabled"),
        (ApiFamily::Auth, 402) => auth(AuthErrorKind::PermissionDenied, "permission denied"),
        (ApiFamily::Auth, 403) => {
            auth(AuthErrorKind::OtpRequired, "2-step verification code required")
        }
        (ApiFamily::Auth, 404) => {
            auth(AuthErrorKind::OtpRequired, "failed to authenticate 2-step verification code")
        }
        (ApiFamily::Auth, 406) => {
            auth(AuthErrorKind::OtpRequired, "2-step verification is enforced")
        }
        (ApiFamily::Auth, 407) => auth(AuthErrorKind::RateLimited, "blocked ip source"),
        (ApiFamily::Auth, 408..=410) => auth(AuthErrorKind::Unavailable, "password expired"),

        (ApiFamily::FileStation, 402) => {
            StorageError::retryable(format!("dsm {context}: system too busy (code {code})"))
        }
        (ApiFamily::FileStation, 408) => match path {
            Some(path) => StorageError::not_found(path),
            None => StorageError::transfer_msg(format!("dsm {context}: no such file or directory")),
        },
        (ApiFamily::FileStation, 415 | 416) => StorageError::Quota {
            context: format!("dsm {context}: code {code}"),
        },

        _ => StorageError::transfer_msg(format!("dsm {context} failed with code {code}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: i64) -> Envelope<serde_json::Value> {
        serde_json::from_value(serde_json::json!({
            "success": false,
            "error": { "code": code },
        }))
        .unwrap()
    }

    #[test]
    fn login_code_400_is_invalid_credentials() {
        let err = failure(400)
            .into_result(ApiFamily::Auth, "login", None)
            .unwrap_err();
        let StorageError::Auth(auth) = err else {
            panic!("expected auth error, got {err:?}");
        };
        assert_eq!(auth.kind, AuthErrorKind::InvalidCredentials);
        assert_eq!(auth.code, Some(400));
    }

    #[test]
    fn same_code_differs_by_family() {
        let path = CanonicalPath::new("a.txt");
        assert!(matches!(
            decode_error(408, ApiFamily::FileStation, "download", Some(&path)),
            StorageError::NotFound { .. }
        ));
        assert!(matches!(
            decode_error(408, ApiFamily::Auth, "login", None),
            StorageError::Auth(AuthError { kind: AuthErrorKind::Unavailable, .. })
        ));
        assert!(decode_error(402, ApiFamily::FileStation, "upload", None).is_retryable());
    }

    #[test]
    fn common_codes() {
        assert!(matches!(
            decode_error(119, ApiFamily::FileStation, "list", None),
            StorageError::Auth(AuthError { kind: AuthErrorKind::SessionExpired, .. })
        ));
        assert!(matches!(
            decode_error(103, ApiFamily::FileStation, "list", None),
            StorageError::NotSupported { .. }
        ));
        assert!(decode_error(110, ApiFamily::Auth, "login", None).is_retryable());
        assert!(matches!(
            decode_error(416, ApiFamily::FileStation, "upload", None),
            StorageError::Quota { .. }
        ));
        let other = decode_error(599, ApiFamily::FileStation, "list", None);
        assert!(other.to_string().contains("599"));
    }

    #[test]
    fn success_without_data() {
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_value(serde_json::json!({ "success": true })).unwrap();
        assert!(
            envelope
                .into_result(ApiFamily::FileStation, "delete", None)
                .unwrap()
                .is_none()
        );
    }
}
