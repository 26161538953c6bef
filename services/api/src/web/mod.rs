//! services/api/src/web/mod.rs
//!
//! The web layer: handlers, middleware, shared state, and the OpenAPI master
//! definition.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

pub mod auth;
pub mod chat;
pub mod credits;
pub mod generator;
pub mod middleware;
pub mod state;
pub mod webhooks;

pub use middleware::require_auth;

/// Error response shape shared by every handler: transport status always
/// reflects the outcome, the body carries the detail.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// The failure type returned by handlers.
pub type ApiFailure = (StatusCode, Json<ErrorBody>);

impl ErrorBody {
    pub fn new(status: StatusCode, error: impl Into<String>) -> ApiFailure {
        (
            status,
            Json(ErrorBody {
                error: error.into(),
            }),
        )
    }
}

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        chat::create_chat_handler,
        chat::post_message_handler,
        chat::list_chats_handler,
        chat::list_messages_handler,
        generator::generator_handler,
        credits::credit_summary_handler,
        webhooks::stripe_webhook_handler,
        webhooks::renewal_webhook_handler,
    ),
    components(
        schemas(
            ErrorBody,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            chat::CreateChatRequest,
            chat::CreateChatResponse,
            chat::PostMessageRequest,
            chat::PostMessageResponse,
            chat::ChatView,
            chat::MessageView,
            generator::IncomingMessage,
            generator::GeneratorRequest,
            generator::GeneratorResponse,
            credits::CreditSummaryResponse,
            webhooks::StripeWebhookResponse,
            webhooks::RenewalRequest,
            webhooks::RenewalResponse,
        )
    ),
    tags(
        (name = "AnamnesIA API", description = "Credit-metered chat backend.")
    )
)]
pub struct ApiDoc;
