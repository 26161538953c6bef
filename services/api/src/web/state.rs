//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use anamnesia_core::credits::RequestGate;
use anamnesia_core::ports::{
    AuditSink, ChatCompletionService, CreditLedger, DatabaseService, EmbeddingService,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub gate: Arc<RequestGate<Arc<dyn CreditLedger>, Arc<dyn AuditSink>>>,
    pub chat_llm: Arc<dyn ChatCompletionService>,
    pub embeddings: Arc<dyn EmbeddingService>,
}
