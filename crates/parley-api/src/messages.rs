use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_db::models::{MessageRow, format_time};
use parley_types::api::{
    Ack, MessagesResponse, SendMessageRequest, SendMessageResponse, UsersResponse,
};
use parley_types::events::ServerEvent;

use crate::auth::{AppState, run_db};
use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;

/// GET /api/messages/users: everyone but the caller, plus how many
/// unseen messages each of them has sent the caller.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> ApiResult<Json<UsersResponse>> {
    let my_id = me.id.to_string();
    let (rows, counts) = run_db(&state, move |db| {
        let rows = db.list_users_except(&my_id)?;
        let counts = db.unseen_counts(&my_id)?;
        Ok((rows, counts))
    })
    .await?;

    let mut unseen_messages = HashMap::new();
    for (sender, count) in counts {
        match sender.parse::<Uuid>() {
            Ok(id) if count > 0 => {
                unseen_messages.insert(id, count);
            }
            Ok(_) => {}
            Err(e) => warn!("Corrupt sender id '{}' in unseen counts: {}", sender, e),
        }
    }

    Ok(Json(UsersResponse {
        success: true,
        users: rows.into_iter().map(|r| r.into_user()).collect(),
        unseen_messages,
    }))
}

/// GET /api/messages/{user_id}: the thread with `user_id`, oldest first.
/// Opening a thread marks the counterpart's messages to the caller as seen.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<MessagesResponse>> {
    let Path(other) = path?;

    let (my_id, other_id) = (me.id.to_string(), other.to_string());
    let rows = run_db(&state, move |db| {
        let rows = db.get_thread(&my_id, &other_id)?;
        db.mark_thread_seen(&other_id, &my_id)?;
        Ok(rows)
    })
    .await?;

    Ok(Json(MessagesResponse {
        success: true,
        messages: rows.into_iter().map(|r| r.into_message()).collect(),
    }))
}

/// POST /api/messages/send/{user_id}
///
/// Stores the message, then pushes it to the receiver's live connection if
/// they have one. The push is best effort; the stored message is returned
/// either way so the sender can append it immediately.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<Json<SendMessageResponse>> {
    let Path(receiver_id) = path?;
    let Json(req) = payload?;

    let text = req.text.filter(|t| !t.trim().is_empty());
    let image = req.image.filter(|i| !i.is_empty());
    if text.is_none() && image.is_none() {
        return Err(ApiError::Validation("Message must have text or an image".into()));
    }

    let rid = receiver_id.to_string();
    if run_db(&state, move |db| db.get_user_by_id(&rid)).await?.is_none() {
        return Err(ApiError::NotFound("User does not exist".into()));
    }

    let image_url = match image {
        Some(data_uri) => Some(
            state
                .media
                .upload(&data_uri)
                .await
                .map_err(|e| ApiError::Upstream(format!("Image upload failed: {}", e)))?,
        ),
        None => None,
    };

    let row = MessageRow {
        id: Uuid::new_v4().to_string(),
        sender_id: me.id.to_string(),
        receiver_id: receiver_id.to_string(),
        text,
        image: image_url,
        seen: false,
        created_at: format_time(chrono::Utc::now()),
    };
    let stored = row.clone();
    run_db(&state, move |db| db.insert_message(&stored)).await?;

    let message = row.into_message();
    if state
        .dispatcher
        .deliver(receiver_id, ServerEvent::NewMessage(message.clone()))
        .await
    {
        debug!("Pushed message {} to {}", message.id, receiver_id);
    } else {
        debug!("{} is offline, message {} left for next fetch", receiver_id, message.id);
    }

    Ok(Json(SendMessageResponse {
        success: true,
        message,
    }))
}

/// PUT /api/messages/mark/{message_id}
pub async fn mark_seen(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Ack>> {
    let Path(message_id) = path?;

    let (mid, my_id) = (message_id.to_string(), me.id.to_string());
    if !run_db(&state, move |db| db.mark_message_seen(&mid, &my_id)).await? {
        return Err(ApiError::NotFound("Message not found".into()));
    }

    Ok(Json(Ack {
        success: true,
        message: None,
    }))
}
