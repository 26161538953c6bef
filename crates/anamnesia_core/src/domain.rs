//! crates/anamnesia_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Sender marker stored on AI-authored messages.
pub const AI_SENDER: &str = "ai";

/// Per-user billing profile.
///
/// `credits` is the extra/lifetime pool and the single balance consulted for
/// admission. The monthly columns are reporting-only and are reset by the
/// renewal webhooks.
#[derive(Debug, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub credits: i64,
    pub monthly_plan_credits: i64,
    pub monthly_usage: i64,
    pub created_at: DateTime<Utc>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// An ordered, append-only conversation owned by one user.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A single message inside a chat. `sender` is either the user's id as a
/// string or the literal [`AI_SENDER`] marker.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Option<Uuid>,
    pub sender: String,
    pub content: String,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry for one billable operation.
#[derive(Debug, Clone)]
pub struct CreditUsageRecord {
    pub user_id: Uuid,
    pub credits_spent: i64,
    pub created_at: DateTime<Utc>,
}

/// A retrieved context chunk from the vector lookup.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    pub source_id: String,
    pub content: String,
}

/// A user-pinned context item that can be prepended to a prompt.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub id: Uuid,
    pub name: String,
    pub content: String,
}

/// Derived credit-usage figures for the current billing period.
#[derive(Debug, Clone)]
pub struct CreditSummary {
    pub monthly_used: i64,
    pub monthly_total: i64,
    pub monthly_remaining: i64,
    pub next_reset_date: DateTime<Utc>,
    pub extra_credits: i64,
}

/// Role tags accepted by the completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One role-tagged entry in the prompt sent to the completion provider.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: ChatRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}
