//! services/api/src/web/chat.rs
//!
//! Handlers for creating chats and appending/listing messages.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use anamnesia_core::credits::Admission;
use crate::web::{state::AppState, ApiFailure, ErrorBody};

/// Flat charge for starting a new chat.
const CHAT_CREATE_COST: i64 = 1;

/// Longest chat title derived from the opening prompt.
const MAX_TITLE_CHARS: usize = 80;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub prompt: String,
    pub model: String,
    pub context_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatResponse {
    pub chat_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct PostMessageRequest {
    pub sender: Option<String>,
    pub content: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PostMessageResponse {
    pub success: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: Uuid,
    pub title: Option<String>,
    pub model_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub sender: String,
    pub content: String,
    pub model_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/chat/create - Start a new chat with an opening user message.
///
/// Starting a chat is a billable operation: one credit is debited through the
/// request gate before any row is written.
#[utoipa::path(
    post,
    path = "/api/chat/create",
    request_body = CreateChatRequest,
    responses(
        (status = 200, description = "Chat created", body = CreateChatResponse),
        (status = 400, description = "Missing prompt or model", body = ErrorBody),
        (status = 402, description = "Insufficient credits", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn create_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    // 1. Validate input
    if req.prompt.trim().is_empty() || req.model.trim().is_empty() {
        return Err(ErrorBody::new(
            StatusCode::BAD_REQUEST,
            "Missing prompt or model",
        ));
    }

    // 2. Admission: flat one-credit charge for the user message send
    let admission = state
        .gate
        .admit_with_cost(user_id, CHAT_CREATE_COST)
        .await
        .map_err(|e| {
            error!("Credit debit failed: {:?}", e);
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Error updating credits")
        })?;
    if admission == Admission::Denied {
        return Err(ErrorBody::new(
            StatusCode::PAYMENT_REQUIRED,
            "Insufficient credits",
        ));
    }

    // 3. Create the chat and its opening message
    let title: String = req.prompt.chars().take(MAX_TITLE_CHARS).collect();
    let chat_id = Uuid::new_v4();
    let chat = state
        .db
        .create_chat(chat_id, user_id, Some(&title), Some(&req.model))
        .await
        .map_err(|e| {
            error!("Failed to create chat: {:?}", e);
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create chat")
        })?;

    state
        .db
        .insert_message(
            chat.id,
            Some(user_id),
            &user_id.to_string(),
            &req.prompt,
            Some(&req.model),
        )
        .await
        .map_err(|e| {
            error!("Failed to insert opening message: {:?}", e);
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save message")
        })?;

    Ok(Json(CreateChatResponse { chat_id: chat.id }))
}

/// POST /api/chat/{chat_id}/message - Append a message to a chat.
#[utoipa::path(
    post,
    path = "/api/chat/{chat_id}/message",
    request_body = PostMessageRequest,
    params(("chat_id" = Uuid, Path, description = "The chat to append to")),
    responses(
        (status = 200, description = "Message saved", body = PostMessageResponse),
        (status = 400, description = "Missing sender or content", body = ErrorBody),
        (status = 404, description = "Chat not found", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    // 1. Validate input
    let (sender, content) = match (req.sender, req.content) {
        (Some(s), Some(c)) if !s.is_empty() && !c.is_empty() => (s, c),
        _ => {
            return Err(ErrorBody::new(
                StatusCode::BAD_REQUEST,
                "Missing sender or content",
            ))
        }
    };

    // 2. The chat must exist and belong to the caller. A foreign chat id gets
    //    the same 404 as a missing one.
    let chat = state.db.get_chat(chat_id).await.map_err(|e| {
        error!("Chat lookup failed: {:?}", e);
        ErrorBody::new(StatusCode::NOT_FOUND, "Invalid chatId")
    })?;
    if chat.user_id != user_id {
        return Err(ErrorBody::new(StatusCode::NOT_FOUND, "Invalid chatId"));
    }

    // 3. Append
    state
        .db
        .insert_message(chat_id, Some(user_id), &sender, &content, None)
        .await
        .map_err(|e| {
            error!("Error saving message: {:?}", e);
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Error saving message")
        })?;

    Ok(Json(PostMessageResponse { success: true }))
}

/// GET /api/chats - List the authenticated user's chats, newest first.
#[utoipa::path(
    get,
    path = "/api/chats",
    responses(
        (status = 200, description = "Chat list", body = [ChatView]),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn list_chats_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, ApiFailure> {
    let chats = state.db.list_chats(user_id).await.map_err(|e| {
        error!("Failed to list chats: {:?}", e);
        ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list chats")
    })?;

    let views: Vec<ChatView> = chats
        .into_iter()
        .map(|c| ChatView {
            id: c.id,
            title: c.title,
            model_id: c.model_id,
            created_at: c.created_at,
        })
        .collect();

    Ok(Json(views))
}

/// GET /api/chat/{chat_id}/messages - List a chat's messages in order.
#[utoipa::path(
    get,
    path = "/api/chat/{chat_id}/messages",
    params(("chat_id" = Uuid, Path, description = "The chat to read")),
    responses(
        (status = 200, description = "Ordered messages", body = [MessageView]),
        (status = 404, description = "Chat not found", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiFailure> {
    let chat = state.db.get_chat(chat_id).await.map_err(|e| {
        error!("Chat lookup failed: {:?}", e);
        ErrorBody::new(StatusCode::NOT_FOUND, "Invalid chatId")
    })?;
    if chat.user_id != user_id {
        return Err(ErrorBody::new(StatusCode::NOT_FOUND, "Invalid chatId"));
    }

    let messages = state.db.list_messages(chat_id).await.map_err(|e| {
        error!("Failed to list messages: {:?}", e);
        ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list messages")
    })?;

    let views: Vec<MessageView> = messages
        .into_iter()
        .map(|m| MessageView {
            id: m.id,
            sender: m.sender,
            content: m.content,
            model_id: m.model_id,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(views))
}
