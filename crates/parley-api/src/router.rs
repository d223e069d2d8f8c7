use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use parley_gateway::connection;

use crate::auth::{self, AppState, verify_token};
use crate::messages;
use crate::middleware::require_auth;

/// REST API plus the socket endpoint. Transport layers (CORS, tracing,
/// static files, body limits) are added by the server binary.
pub fn build(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/status", get(status))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/socket", get(socket_upgrade));

    let protected_routes = Router::new()
        .route("/api/auth/check", get(auth::check))
        .route("/api/auth/update-profile", put(auth::update_profile))
        .route("/api/messages/users", get(messages::list_users))
        .route("/api/messages/{user_id}", get(messages::get_messages))
        .route("/api/messages/send/{user_id}", post(messages::send_message))
        .route("/api/messages/mark/{message_id}", put(messages::mark_seen))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn status() -> &'static str {
    "API is working!"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketQuery {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

/// GET /socket?userId=...&token=...
///
/// Without `userId` the socket only receives broadcasts. A `token`, when
/// given, must verify and name the same user.
async fn socket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match query.user_id.filter(|raw| !raw.is_empty()) {
        Some(raw) => match raw.parse::<Uuid>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Socket upgrade with malformed userId '{}'", raw);
                return (StatusCode::BAD_REQUEST, "invalid userId").into_response();
            }
        },
        None => None,
    };

    if let Some(token) = query.token {
        match verify_token(&state.jwt_secret, &token) {
            Ok(claims) if Some(claims.sub) == user_id => {}
            _ => {
                warn!("Socket upgrade rejected: token does not match userId");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    }

    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, user_id))
}
