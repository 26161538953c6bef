pub mod credits;
pub mod domain;
pub mod ports;

pub use credits::{model_cost, Admission, RequestGate, ECONOMY_MODEL};
pub use domain::{
    AuthSession, Chat, ChatRole, ContextChunk, ContextItem, CreditSummary, CreditUsageRecord,
    Message, Profile, PromptMessage, UserCredentials, AI_SENDER,
};
pub use ports::{
    AuditSink, ChatCompletionService, CreditLedger, DatabaseService, DebitOutcome,
    EmbeddingService, PortError, PortResult,
};
