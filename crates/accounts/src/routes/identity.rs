use axum::{Extension, Json, Router, routing::get};
use tracing::instrument;
use utils::api::auth::IdentityResponse;

use crate::{AppState, auth::AuthenticatedUser};

pub fn router() -> Router<AppState> {
    Router::new().route("/identity", get(get_identity))
}

#[instrument(name = "identity.get_identity", skip(ctx), fields(user_id = %ctx.user.id))]
pub async fn get_identity(Extension(ctx): Extension<AuthenticatedUser>) -> Json<IdentityResponse> {
    let user = ctx.user;
    Json(IdentityResponse {
        user_id: user.id,
        email: user.email,
        roles: user.roles,
    })
}
