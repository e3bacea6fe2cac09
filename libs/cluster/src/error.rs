//! API error taxonomy.

use lca_reconcile::Retriable;
use thiserror::Error;

/// Errors returned by [`crate::ClusterReader`] and [`crate::ClusterClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create of an object that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency conflict (stale resource version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server rejected the request as malformed.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Throttling, server timeouts and transport failures.
    #[error("transient API error: {0}")]
    Transient(String),

    /// The object could not be converted to or from its typed form.
    #[error("decode error: {0}")]
    Decode(String),

    /// Anything else.
    #[error("API error: {0}")]
    Other(String),
}

impl ApiError {
    /// Returns true for [`ApiError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for [`ApiError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl Retriable for ApiError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => {
                let message = resp.message.clone();
                match (resp.code, resp.reason.as_str()) {
                    (404, _) => Self::NotFound(message),
                    (409, "AlreadyExists") => Self::AlreadyExists(message),
                    (409, _) => Self::Conflict(message),
                    (400, _) | (422, _) => Self::Invalid(message),
                    (429, _) | (500, _) | (503, _) | (504, _) => Self::Transient(message),
                    (code, reason) => Self::Other(format!("{reason} ({code}): {message}")),
                }
            }
            kube::Error::HyperError(e) => Self::Transient(e.to_string()),
            kube::Error::Service(e) => Self::Transient(e.to_string()),
            kube::Error::SerdeError(e) => Self::Decode(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Convenience conversions for API results.
pub trait ResultExt<T> {
    /// Turn [`ApiError::NotFound`] into `Ok(None)`.
    fn ignore_not_found(self) -> Result<Option<T>, ApiError>;

    /// Turn [`ApiError::AlreadyExists`] into `Ok(None)`.
    fn ignore_already_exists(self) -> Result<Option<T>, ApiError>;
}

impl<T> ResultExt<T> for Result<T, ApiError> {
    fn ignore_not_found(self) -> Result<Option<T>, ApiError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn ignore_already_exists(self) -> Result<Option<T>, ApiError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::AlreadyExists(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_mapping() {
        assert!(ApiError::from(api_error(404, "NotFound")).is_not_found());
        assert!(ApiError::from(api_error(409, "AlreadyExists")).is_already_exists());
        assert!(ApiError::from(api_error(409, "Conflict")).is_conflict());
        assert!(ApiError::from(api_error(429, "TooManyRequests")).is_retriable());
        assert!(ApiError::from(api_error(503, "ServiceUnavailable")).is_retriable());
        assert!(!ApiError::from(api_error(403, "Forbidden")).is_retriable());
    }

    #[test]
    fn test_ignore_not_found() {
        let missing: Result<u32, ApiError> = Err(ApiError::NotFound("x".into()));
        assert_eq!(missing.ignore_not_found(), Ok(None));

        let other: Result<u32, ApiError> = Err(ApiError::Conflict("x".into()));
        assert!(other.ignore_not_found().is_err());

        let found: Result<u32, ApiError> = Ok(7);
        assert_eq!(found.ignore_not_found(), Ok(Some(7)));

        let exists: Result<u32, ApiError> = Err(ApiError::AlreadyExists("x".into()));
        assert_eq!(exists.ignore_already_exists(), Ok(None));
    }
}
