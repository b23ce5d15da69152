use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::warn;
use utils::api::auth::{SignInRequest, TokenPairResponse};

use super::error::ErrorResponse;
use crate::{AppState, auth::SignInOutcome};

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/{provider}", post(sign_in))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(%provider, reason = %rejection.body_text(), "malformed sign-in request");
            return ErrorResponse::invalid_request().into_response();
        }
    };

    match state.sign_in().sign_in(&provider, &payload.id_token).await {
        Ok(SignInOutcome::Issued(tokens)) => Json(TokenPairResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
        .into_response(),
        Ok(SignInOutcome::NotRegistered) => {
            Json(TokenPairResponse::not_registered()).into_response()
        }
        Err(error) => error.into_response(),
    }
}
