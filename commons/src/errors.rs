use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

/// Result type used across the registry engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by the storage engine and its collaborators.
///
/// Every variant has a stable kind string and an HTTP status so the edge can
/// map engine failures without inspecting error text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{0}: already exists")]
    AlreadyExists(String),
    #[error("invalid artifact type {0}")]
    InvalidArtifactType(String),
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("aes key must be 32 bytes")]
    BadKey,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("upstream registry error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Error::NotFound(what.into())
    }

    pub fn already_exists<S: Into<String>>(what: S) -> Self {
        Error::AlreadyExists(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }

    // Return the HTTP status code for the error.
    pub fn as_status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::InvalidArtifactType(_) => StatusCode::BAD_REQUEST,
            Error::InvalidPackage(_) => StatusCode::BAD_REQUEST,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::BadKey => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Return the kind for the error.
    pub fn as_kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidArtifactType(_) => "invalid_artifact_type",
            Error::InvalidPackage(_) => "invalid_package",
            Error::BadRequest(_) => "bad_request",
            Error::BadKey => "bad_key",
            Error::Unauthorized(_) => "unauthorized",
            Error::Upstream { .. } => "upstream_error",
            Error::Internal(_) => "internal",
        }
    }

    /// Return the HTTP JSON error response.
    pub fn as_json_error(&self) -> HttpResponse {
        let code = self.as_status_code();
        let json_body = json!({
            "kind": self.as_kind(),
            "value": format!("{}", self),
        });
        HttpResponse::build(code).json(json_body)
    }
}

impl actix_web::error::ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        self.as_status_code()
    }

    fn error_response(&self) -> HttpResponse {
        self.as_json_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            Error::not_found("x").as_status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::already_exists("x").as_status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(Error::BadKey.as_status_code().as_u16(), 500);
        assert_eq!(
            Error::Upstream {
                status: 429,
                message: "too many requests".into()
            }
            .as_status_code()
            .as_u16(),
            429
        );
        assert_eq!(
            Error::Upstream {
                status: 0,
                message: "bogus".into()
            }
            .as_status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::not_found("a").as_kind(), "not_found");
        assert_eq!(
            Error::InvalidArtifactType("application/foo".into()).as_kind(),
            "invalid_artifact_type"
        );
        assert_eq!(
            Error::Internal(anyhow::anyhow!("boom")).as_kind(),
            "internal"
        );
    }

    #[test]
    fn not_found_predicate() {
        assert!(Error::not_found("pkg").is_not_found());
        assert!(!Error::already_exists("pkg").is_not_found());
    }
}
