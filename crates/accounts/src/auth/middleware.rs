use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, warn};
use utils::sentry::with_user_scope;

use super::{jwt::JwtError, resolver::Resolution};
use crate::{AppState, db::users::User};

/// The resolved caller, attached to the request for the rest of its handling.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub access_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionRejection {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("access token signature invalid")]
    SignatureInvalid,
    #[error("access token expired")]
    TokenExpired,
    #[error("access token is missing claim `{0}`")]
    ClaimMissing(&'static str),
    #[error("user not found")]
    UserNotFound,
    #[error("session validation failed internally")]
    Internal,
}

impl From<JwtError> for SessionRejection {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::TokenExpired => SessionRejection::TokenExpired,
            JwtError::ClaimMissing(claim) => SessionRejection::ClaimMissing(claim),
            JwtError::InvalidSecret | JwtError::Jwt(_) => SessionRejection::Internal,
            JwtError::InvalidToken
            | JwtError::SignatureInvalid
            | JwtError::AlgorithmMismatch(_) => SessionRejection::SignatureInvalid,
        }
    }
}

pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let bearer = match req.headers().typed_get::<Authorization<Bearer>>() {
        Some(Authorization(token)) => token.token().to_owned(),
        None => return SessionRejection::MissingCredential.into_response(),
    };

    let details = match state.jwt().decode_access_token(&bearer) {
        Ok(details) => details,
        Err(error) => {
            let rejection = SessionRejection::from(error);
            match rejection {
                SessionRejection::Internal => error!("access token validation misconfigured"),
                _ => warn!(reason = %rejection, "rejected access token"),
            }
            return rejection.into_response();
        }
    };

    let user = match state.resolver().resolve_email(&details.email).await {
        Ok(Resolution::Existing(user)) => user,
        Ok(Resolution::NotFound) => {
            warn!(user_id = %details.user_id, "access token subject no longer resolves");
            return SessionRejection::UserNotFound.into_response();
        }
        Err(error) => {
            error!(?error, "failed to load user for session");
            return SessionRejection::Internal.into_response();
        }
    };

    let user_id = user.id.to_string();
    let email = user.email.clone();
    req.extensions_mut().insert(AuthenticatedUser {
        user,
        access_token_expires_at: details.expires_at,
    });

    with_user_scope(&user_id, Some(&email), next.run(req)).await
}
