//! crates/anamnesia_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuthSession, Chat, ContextChunk, ContextItem, CreditSummary, Message, Profile, PromptMessage,
    UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Upstream provider error: {0}")]
    Upstream(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Profile Management ---
    async fn create_profile(&self, email: &str, hashed_password: &str) -> PortResult<Profile>;

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    /// Applies a renewal event: sets the monthly allotment and zeroes the
    /// period usage. A set, not an increment, so re-delivery is safe.
    async fn apply_renewal(&self, user_id: Uuid, plan_credits: i64) -> PortResult<()>;

    /// Same as [`apply_renewal`](Self::apply_renewal) but keyed by the billing
    /// provider's customer id.
    async fn apply_renewal_by_customer(
        &self,
        stripe_customer_id: &str,
        plan_credits: i64,
    ) -> PortResult<()>;

    // --- Auth Sessions ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<AuthSession>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Chats and Messages ---
    async fn create_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        title: Option<&str>,
        model_id: Option<&str>,
    ) -> PortResult<Chat>;

    async fn get_chat(&self, chat_id: Uuid) -> PortResult<Chat>;

    async fn list_chats(&self, user_id: Uuid) -> PortResult<Vec<Chat>>;

    async fn insert_message(
        &self,
        chat_id: Uuid,
        user_id: Option<Uuid>,
        sender: &str,
        content: &str,
        model_id: Option<&str>,
    ) -> PortResult<Message>;

    async fn list_messages(&self, chat_id: Uuid) -> PortResult<Vec<Message>>;

    // --- Credit Reporting ---
    /// Sums `credits_spent` over the current calendar month and combines it
    /// with the profile's plan allotment. Reporting only; never consulted for
    /// admission.
    async fn get_credit_summary(&self, user_id: Uuid) -> PortResult<CreditSummary>;

    // --- Retrieval ---
    /// Server-side vector-similarity lookup returning up to `match_count`
    /// nearest content chunks for the query embedding.
    async fn match_document_chunks(
        &self,
        query_embedding: &[f32],
        match_count: i64,
    ) -> PortResult<Vec<ContextChunk>>;

    async fn get_context_item(&self, context_item_id: Uuid) -> PortResult<ContextItem>;
}

/// The outcome of an atomic conditional debit against a profile balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The decrement was applied; `remaining` is the balance after it.
    Applied { remaining: i64 },
    /// The balance was below the cost (a missing profile counts as zero).
    InsufficientFunds,
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Decrements the balance by `cost` iff the balance covers it, as a single
    /// atomic conditional update. Never read-then-write.
    async fn try_debit(&self, user_id: Uuid, cost: i64) -> PortResult<DebitOutcome>;

    /// Appends one audit record to the credit-usage log.
    async fn record_usage(&self, user_id: Uuid, credits_spent: i64) -> PortResult<()>;
}

/// Receives audit events after an admitted debit. Submission must not block
/// the billable request; delivery is at-least-once with failures logged.
pub trait AuditSink: Send + Sync {
    fn submit(&self, user_id: Uuid, credits_spent: i64);
}

#[async_trait]
pub trait ChatCompletionService: Send + Sync {
    /// Forwards an ordered, role-tagged prompt to the completion provider and
    /// returns the generated content.
    async fn complete(&self, model: &str, messages: &[PromptMessage]) -> PortResult<String>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embeds free text into the fixed-length vector used for retrieval.
    async fn embed(&self, input: &str) -> PortResult<Vec<f32>>;
}
