use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::auth::{SessionRejection, SignInError, VerifyError};

#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    code: &'static str,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: &'static str) -> Self {
        Self { status, code }
    }

    pub fn invalid_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.code }))).into_response()
    }
}

impl From<&SignInError> for ErrorResponse {
    fn from(error: &SignInError) -> Self {
        match error {
            SignInError::UnsupportedProvider(_) => {
                ErrorResponse::new(StatusCode::BAD_REQUEST, "unsupported_provider")
            }
            SignInError::EmptyCredential => ErrorResponse::invalid_request(),
            SignInError::Verification(err) if err.is_transient() => {
                ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "provider_unavailable")
            }
            SignInError::Verification(err) => verification_error(err),
            SignInError::Identity(_) | SignInError::Issue(_) => ErrorResponse::internal(),
        }
    }
}

fn verification_error(error: &VerifyError) -> ErrorResponse {
    ErrorResponse::new(StatusCode::UNAUTHORIZED, error.code())
}

impl IntoResponse for SignInError {
    fn into_response(self) -> Response {
        ErrorResponse::from(&self).into_response()
    }
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        let response = match self {
            SessionRejection::MissingCredential => {
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "missing_credential")
            }
            SessionRejection::SignatureInvalid => {
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "signature_invalid")
            }
            SessionRejection::TokenExpired => {
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "token_expired")
            }
            SessionRejection::ClaimMissing(_) => {
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "claim_missing")
            }
            SessionRejection::UserNotFound => {
                ErrorResponse::new(StatusCode::UNAUTHORIZED, "user_not_found")
            }
            SessionRejection::Internal => ErrorResponse::internal(),
        };
        response.into_response()
    }
}
