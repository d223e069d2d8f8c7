use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use parley_types::models::User;

use crate::auth::{AppState, run_db, verify_token};
use crate::error::{ApiError, ApiResult};

/// The authenticated caller, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Verify the bearer token and load the user it names. The sanitized user
/// is attached to the request as a [`CurrentUser`] extension.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let Ok(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(ApiError::Auth("Not authorized, token missing".into()));
    };

    let claims = verify_token(&state.jwt_secret, bearer.token())?;

    let id = claims.sub.to_string();
    let user = run_db(&state, move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    req.extensions_mut().insert(CurrentUser(user.into_user()));
    Ok(next.run(req).await)
}
