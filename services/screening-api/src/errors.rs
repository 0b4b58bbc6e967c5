use actix_web::http::StatusCode;
use actix_web::{error::JsonPayloadError, HttpRequest, HttpResponse, ResponseError};
use screening_core::Error as ScreeningError;
use std::fmt;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    ValidationError(String),
    SourcesUnavailable(String),
    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::SourcesUnavailable(msg) => write!(f, "{}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ScreeningError> for ApiError {
    fn from(err: ScreeningError) -> Self {
        match err {
            ScreeningError::InvalidInput(msg) => ApiError::ValidationError(msg),
            e @ ScreeningError::BothSourcesUnavailable { .. } => {
                ApiError::SourcesUnavailable(e.to_string())
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::ValidationError(_) => "InvalidInput",
            ApiError::SourcesUnavailable(_) => "BothSourcesUnavailable",
            ApiError::InternalError(_) => "InternalError",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::SourcesUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string()
        }))
    }
}

/// Malformed or mistyped JSON bodies are the caller's fault
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::ValidationError(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let invalid: ApiError = ScreeningError::InvalidInput("Name is required".to_string()).into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let down: ApiError = ScreeningError::BothSourcesUnavailable {
            eu: "timed out".to_string(),
            un: "unreachable".to_string(),
        }
        .into();
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(down.to_string().contains("EU: timed out"));

        let other: ApiError = ScreeningError::Storage("bucket missing".to_string()).into();
        assert_eq!(other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
