//! Shared in-memory fakes for the integration tests. Each fake implements a
//! core port with the same observable semantics as the real adapter.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use anamnesia_core::credits::RequestGate;
use anamnesia_core::domain::{
    AuthSession, Chat, ContextChunk, ContextItem, CreditSummary, Message, Profile, PromptMessage,
    UserCredentials,
};
use anamnesia_core::ports::{
    AuditSink, ChatCompletionService, CreditLedger, DatabaseService, DebitOutcome,
    EmbeddingService, PortError, PortResult,
};
use api_lib::config::Config;
use api_lib::web::state::AppState;

pub const TEST_STRIPE_SECRET: &str = "whsec_test_secret";
pub const TEST_RENEWAL_SECRET: &str = "renewal_test_secret";

//=========================================================================================
// In-Memory Database + Ledger
//=========================================================================================

#[derive(Default)]
pub struct MemDb {
    pub profiles: Mutex<HashMap<Uuid, Profile>>,
    pub chats: Mutex<HashMap<Uuid, Chat>>,
    pub messages: Mutex<Vec<Message>>,
    pub usage: Mutex<Vec<(Uuid, i64)>>,
    pub chunks: Mutex<Vec<ContextChunk>>,
    pub context_items: Mutex<HashMap<Uuid, ContextItem>>,
    pub sessions: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
    /// Number of `record_usage` calls to fail before succeeding.
    pub usage_failures: AtomicU32,
}

impl MemDb {
    pub fn with_profile(user_id: Uuid, credits: i64) -> Arc<Self> {
        let db = Arc::new(Self::default());
        db.profiles.lock().unwrap().insert(
            user_id,
            Profile {
                id: user_id,
                email: Some(format!("{}@example.com", user_id)),
                stripe_customer_id: Some(format!("cus_{}", user_id.simple())),
                credits,
                monthly_plan_credits: 0,
                monthly_usage: 0,
                created_at: Utc::now(),
            },
        );
        db
    }

    pub fn credits_of(&self, user_id: Uuid) -> i64 {
        self.profiles.lock().unwrap()[&user_id].credits
    }

    pub fn usage_records(&self) -> Vec<(Uuid, i64)> {
        self.usage.lock().unwrap().clone()
    }

    pub fn customer_id_of(&self, user_id: Uuid) -> String {
        self.profiles.lock().unwrap()[&user_id]
            .stripe_customer_id
            .clone()
            .unwrap()
    }
}

#[async_trait]
impl DatabaseService for MemDb {
    async fn create_profile(&self, email: &str, hashed_password: &str) -> PortResult<Profile> {
        let _ = hashed_password;
        let profile = Profile {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            stripe_customer_id: None,
            credits: 0,
            monthly_plan_credits: 0,
            monthly_usage: 0,
            created_at: Utc::now(),
        };
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        self.profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        Err(PortError::NotFound(format!("No profile for email {}", email)))
    }

    async fn apply_renewal(&self, user_id: Uuid, plan_credits: i64) -> PortResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        profile.monthly_plan_credits = plan_credits;
        profile.monthly_usage = 0;
        Ok(())
    }

    async fn apply_renewal_by_customer(
        &self,
        stripe_customer_id: &str,
        plan_credits: i64,
    ) -> PortResult<()> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .values_mut()
            .find(|p| p.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .ok_or_else(|| {
                PortError::NotFound(format!("No profile for customer {}", stripe_customer_id))
            })?;
        profile.monthly_plan_credits = plan_credits;
        profile.monthly_usage = 0;
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<AuthSession> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(AuthSession {
            id: session_id.to_string(),
            user_id,
            expires_at,
        })
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => Ok(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn create_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        title: Option<&str>,
        model_id: Option<&str>,
    ) -> PortResult<Chat> {
        let chat = Chat {
            id: chat_id,
            user_id,
            title: title.map(str::to_string),
            model_id: model_id.map(str::to_string),
            created_at: Utc::now(),
        };
        self.chats.lock().unwrap().insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn get_chat(&self, chat_id: Uuid) -> PortResult<Chat> {
        self.chats
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))
    }

    async fn list_chats(&self, user_id: Uuid) -> PortResult<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .chats
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    async fn insert_message(
        &self,
        chat_id: Uuid,
        user_id: Option<Uuid>,
        sender: &str,
        content: &str,
        model_id: Option<&str>,
    ) -> PortResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            user_id,
            sender: sender.to_string(),
            content: content.to_string(),
            model_id: model_id.map(str::to_string),
            created_at: Utc::now(),
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, chat_id: Uuid) -> PortResult<Vec<Message>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn get_credit_summary(&self, user_id: Uuid) -> PortResult<CreditSummary> {
        let profile = self.get_profile(user_id).await?;
        let monthly_used: i64 = self
            .usage
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, spent)| spent)
            .sum();
        Ok(CreditSummary {
            monthly_used,
            monthly_total: profile.monthly_plan_credits,
            monthly_remaining: (profile.monthly_plan_credits - monthly_used).max(0),
            next_reset_date: Utc::now() + Duration::days(30),
            extra_credits: profile.credits,
        })
    }

    async fn match_document_chunks(
        &self,
        _query_embedding: &[f32],
        match_count: i64,
    ) -> PortResult<Vec<ContextChunk>> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .take(match_count as usize)
            .cloned()
            .collect())
    }

    async fn get_context_item(&self, context_item_id: Uuid) -> PortResult<ContextItem> {
        self.context_items
            .lock()
            .unwrap()
            .get(&context_item_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Context item {} not found", context_item_id))
            })
    }
}

#[async_trait]
impl CreditLedger for MemDb {
    async fn try_debit(&self, user_id: Uuid, cost: i64) -> PortResult<DebitOutcome> {
        let mut profiles = self.profiles.lock().unwrap();
        match profiles.get_mut(&user_id) {
            Some(profile) if profile.credits >= cost => {
                profile.credits -= cost;
                Ok(DebitOutcome::Applied {
                    remaining: profile.credits,
                })
            }
            // Missing profile bills as a zero balance, same as the SQL path.
            _ => Ok(DebitOutcome::InsufficientFunds),
        }
    }

    async fn record_usage(&self, user_id: Uuid, credits_spent: i64) -> PortResult<()> {
        if self
            .usage_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PortError::Unexpected("usage insert failed".to_string()));
        }
        self.usage.lock().unwrap().push((user_id, credits_spent));
        Ok(())
    }
}

//=========================================================================================
// Synchronous Audit Sink
//=========================================================================================

/// Writes the audit record inline instead of through the background queue, so
/// tests observe the record deterministically.
pub struct DirectAudit {
    pub db: Arc<MemDb>,
}

impl AuditSink for DirectAudit {
    fn submit(&self, user_id: Uuid, credits_spent: i64) {
        self.db
            .usage
            .lock()
            .unwrap()
            .push((user_id, credits_spent));
    }
}

/// Drops every audit event, for exercising the lossy-audit direction.
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn submit(&self, _user_id: Uuid, _credits_spent: i64) {}
}

//=========================================================================================
// Fake Providers
//=========================================================================================

pub struct FakeChat {
    pub reply: String,
    pub fail: bool,
    pub prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl FakeChat {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: String::new(),
            fail: true,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatCompletionService for FakeChat {
    async fn complete(&self, _model: &str, messages: &[PromptMessage]) -> PortResult<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if self.fail {
            return Err(PortError::Upstream("model unavailable".to_string()));
        }
        Ok(self.reply.clone())
    }
}

pub struct FakeEmbedding {
    pub fail: bool,
}

#[async_trait]
impl EmbeddingService for FakeEmbedding {
    async fn embed(&self, _input: &str) -> PortResult<Vec<f32>> {
        if self.fail {
            return Err(PortError::Upstream("embedding unavailable".to_string()));
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

//=========================================================================================
// State Assembly
//=========================================================================================

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: tracing::Level::INFO,
        openai_api_key: None,
        embedding_model: "text-embedding-3-small".to_string(),
        rag_match_count: 3,
        stripe_webhook_secret: TEST_STRIPE_SECRET.to_string(),
        renewal_webhook_secret: TEST_RENEWAL_SECRET.to_string(),
    }
}

pub fn app_state(
    db: Arc<MemDb>,
    chat: Arc<FakeChat>,
    embeddings_fail: bool,
) -> Arc<AppState> {
    let ledger: Arc<dyn CreditLedger> = db.clone();
    let audit: Arc<dyn AuditSink> = Arc::new(DirectAudit { db: db.clone() });
    Arc::new(AppState {
        db: db.clone(),
        config: Arc::new(test_config()),
        gate: Arc::new(RequestGate::new(ledger, audit)),
        chat_llm: chat,
        embeddings: Arc::new(FakeEmbedding {
            fail: embeddings_fail,
        }),
    })
}
