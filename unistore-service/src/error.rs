//! Error taxonomy shared by all backends.

use std::fmt;

use thiserror::Error;

/// Errors that can occur when talking to a storage provider.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("object not found: {path}")]
    NotFound {
        /// Canonical path of the missing object.
        path: String,
    },

    /// The provider rejected the credentials or the session.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Network, transport, or unexpected provider failure.
    #[error("transfer error: {context}")]
    Transfer {
        /// What was being attempted.
        context: String,
        /// The underlying failure, if there is one.
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// Whether repeating the request may succeed.
        retryable: bool,
    },

    /// The backend cannot perform this operation.
    #[error("{backend} does not support {operation}")]
    NotSupported {
        /// Name of the backend.
        backend: &'static str,
        /// The operation or API that is unavailable.
        operation: String,
    },

    /// The provider is out of space or over its quota.
    #[error("quota exceeded: {context}")]
    Quota {
        /// Provider message or operation context.
        context: String,
    },

    /// The path cannot be used with this backend.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The backend configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Creates a non-retryable [`StorageError::Transfer`] wrapping `cause`.
    pub fn transfer<E>(context: impl Into<String>, cause: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Transfer {
            context: context.into(),
            cause: Some(cause.into()),
            retryable: false,
        }
    }

    /// Creates a [`StorageError::Transfer`] without an underlying error.
    pub fn transfer_msg(context: impl Into<String>) -> Self {
        Self::Transfer {
            context: context.into(),
            cause: None,
            retryable: false,
        }
    }

    /// Creates a transfer error that callers may retry.
    pub fn retryable(context: impl Into<String>) -> Self {
        Self::Transfer {
            context: context.into(),
            cause: None,
            retryable: true,
        }
    }

    /// Creates a [`StorageError::NotFound`] for the given path.
    pub fn not_found(path: impl fmt::Display) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }

    /// Returns `true` if the same request may succeed when repeated.
    ///
    /// Credential failures never are. Transport failures are only retryable when the provider
    /// signalled a transient condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transfer { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns `true` for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::transfer("i/o error", err)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Classification of authentication failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Unknown account or wrong password.
    InvalidCredentials,
    /// A one-time password is required or was rejected.
    OtpRequired,
    /// Too many failed attempts; the client is blocked for a while.
    RateLimited,
    /// The account cannot log in right now (disabled, password expired).
    Unavailable,
    /// The session is gone and a fresh login is needed.
    SessionExpired,
    /// The account lacks permission for the request.
    PermissionDenied,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidCredentials => "invalid credentials",
            Self::OtpRequired => "one-time password required",
            Self::RateLimited => "too many attempts",
            Self::Unavailable => "account unavailable",
            Self::SessionExpired => "session expired",
            Self::PermissionDenied => "permission denied",
        };
        f.write_str(s)
    }
}

/// Authentication failure reported by a provider.
#[derive(Clone, Debug, Error)]
#[error("authentication failed ({kind}){}: {message}", code_suffix(.code))]
pub struct AuthError {
    /// Failure class.
    pub kind: AuthErrorKind,
    /// Provider-specific error code, if one was reported.
    pub code: Option<i64>,
    /// Human readable description.
    pub message: String,
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|code| format!(" [code {code}]")).unwrap_or_default()
}

impl AuthError {
    /// Creates a new error without a provider code.
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Attaches the provider's numeric code.
    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_not_retryable() {
        let err = StorageError::from(
            AuthError::new(AuthErrorKind::InvalidCredentials, "bad password").with_code(400),
        );
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "authentication failed (invalid credentials) [code 400]: bad password"
        );

        let err = AuthError::new(AuthErrorKind::OtpRequired, "enter the code");
        assert_eq!(
            err.to_string(),
            "authentication failed (one-time password required): enter the code"
        );
    }

    #[test]
    fn retryable_transfer() {
        assert!(StorageError::retryable("busy").is_retryable());
        assert!(!StorageError::transfer_msg("broken").is_retryable());
        assert!(!StorageError::not_found("a").is_retryable());
    }
}
