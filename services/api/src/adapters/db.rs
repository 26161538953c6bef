//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` and `CreditLedger` ports from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use anamnesia_core::domain::{
    AuthSession, Chat, ContextChunk, ContextItem, CreditSummary, Message, Profile, UserCredentials,
};
use anamnesia_core::ports::{
    CreditLedger, DatabaseService, DebitOutcome, PortError, PortResult,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` and `CreditLedger` ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    email: Option<String>,
    stripe_customer_id: Option<String>,
    credits: i64,
    monthly_plan_credits: i64,
    monthly_usage: i64,
    created_at: DateTime<Utc>,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            id: self.id,
            email: self.email,
            stripe_customer_id: self.stripe_customer_id,
            credits: self.credits,
            monthly_plan_credits: self.monthly_plan_credits,
            monthly_usage: self.monthly_usage,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ChatRecord {
    id: Uuid,
    user_id: Uuid,
    title: Option<String>,
    model_id: Option<String>,
    created_at: DateTime<Utc>,
}
impl ChatRecord {
    fn to_domain(self) -> Chat {
        Chat {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            model_id: self.model_id,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_id: Uuid,
    user_id: Option<Uuid>,
    sender: String,
    content: String,
    model_id: Option<String>,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            user_id: self.user_id,
            sender: self.sender,
            content: self.content,
            model_id: self.model_id,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ChunkRecord {
    source_id: String,
    content: String,
}

#[derive(FromRow)]
struct ContextItemRecord {
    id: Uuid,
    name: String,
    content: String,
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_profile(&self, email: &str, hashed_password: &str) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "INSERT INTO profiles (id, email, hashed_password) VALUES ($1, $2, $3) \
             RETURNING id, email, stripe_customer_id, credits, monthly_plan_credits, \
                       monthly_usage, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, email, stripe_customer_id, credits, monthly_plan_credits, \
                    monthly_usage, created_at \
             FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;

        Ok(record.to_domain())
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM profiles WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("No profile for email {}", email)))?;

        Ok(record.to_domain())
    }

    async fn apply_renewal(&self, user_id: Uuid, plan_credits: i64) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET monthly_plan_credits = $2, monthly_usage = 0 WHERE id = $1",
        )
        .bind(user_id)
        .bind(plan_credits)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", user_id)));
        }
        Ok(())
    }

    async fn apply_renewal_by_customer(
        &self,
        stripe_customer_id: &str,
        plan_credits: i64,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET monthly_plan_credits = $2, monthly_usage = 0 \
             WHERE stripe_customer_id = $1",
        )
        .bind(stripe_customer_id)
        .bind(plan_credits)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "No profile for customer {}",
                stripe_customer_id
            )));
        }
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<AuthSession> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(AuthSession {
            id: session_id.to_string(),
            user_id,
            expires_at,
        })
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        title: Option<&str>,
        model_id: Option<&str>,
    ) -> PortResult<Chat> {
        let record = sqlx::query_as::<_, ChatRecord>(
            "INSERT INTO chats (id, user_id, title, model_id) VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, title, model_id, created_at",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(title)
        .bind(model_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn get_chat(&self, chat_id: Uuid) -> PortResult<Chat> {
        let record = sqlx::query_as::<_, ChatRecord>(
            "SELECT id, user_id, title, model_id, created_at FROM chats WHERE id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))?;

        Ok(record.to_domain())
    }

    async fn list_chats(&self, user_id: Uuid) -> PortResult<Vec<Chat>> {
        let records = sqlx::query_as::<_, ChatRecord>(
            "SELECT id, user_id, title, model_id, created_at FROM chats \
             WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(ChatRecord::to_domain).collect())
    }

    async fn insert_message(
        &self,
        chat_id: Uuid,
        user_id: Option<Uuid>,
        sender: &str,
        content: &str,
        model_id: Option<&str>,
    ) -> PortResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO messages (id, chat_id, user_id, sender, content, model_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, chat_id, user_id, sender, content, model_id, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(chat_id)
        .bind(user_id)
        .bind(sender)
        .bind(content)
        .bind(model_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(record.to_domain())
    }

    async fn list_messages(&self, chat_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, chat_id, user_id, sender, content, model_id, created_at \
             FROM messages WHERE chat_id = $1 ORDER BY created_at ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(MessageRecord::to_domain).collect())
    }

    async fn get_credit_summary(&self, user_id: Uuid) -> PortResult<CreditSummary> {
        let profile = self.get_profile(user_id).await?;

        // Monthly usage is derived from the append-only audit log, summed
        // from the first day of the current calendar month.
        let (monthly_used, next_reset_date) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "SELECT COALESCE(SUM(credits_spent), 0)::bigint, \
                    date_trunc('month', now()) + interval '1 month' \
             FROM credit_usage \
             WHERE user_id = $1 AND created_at >= date_trunc('month', now())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let monthly_total = profile.monthly_plan_credits;
        Ok(CreditSummary {
            monthly_used,
            monthly_total,
            monthly_remaining: (monthly_total - monthly_used).max(0),
            next_reset_date,
            extra_credits: profile.credits,
        })
    }

    async fn match_document_chunks(
        &self,
        query_embedding: &[f32],
        match_count: i64,
    ) -> PortResult<Vec<ContextChunk>> {
        let records = sqlx::query_as::<_, ChunkRecord>(
            "SELECT source_id, content FROM match_document_chunks($1, $2)",
        )
        .bind(query_embedding)
        .bind(match_count as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|r| ContextChunk {
                source_id: r.source_id,
                content: r.content,
            })
            .collect())
    }

    async fn get_context_item(&self, context_item_id: Uuid) -> PortResult<ContextItem> {
        let record = sqlx::query_as::<_, ContextItemRecord>(
            "SELECT id, name, content FROM context_items WHERE id = $1",
        )
        .bind(context_item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::NotFound(format!("Context item {} not found", context_item_id))
        })?;

        Ok(ContextItem {
            id: record.id,
            name: record.name,
            content: record.content,
        })
    }
}

//=========================================================================================
// `CreditLedger` Trait Implementation
//=========================================================================================

#[async_trait]
impl CreditLedger for DbAdapter {
    /// Atomic conditional decrement. The balance check and the write are one
    /// statement, so two concurrent requests can never both pass the check
    /// against the same funds.
    async fn try_debit(&self, user_id: Uuid, cost: i64) -> PortResult<DebitOutcome> {
        let row = sqlx::query_as::<_, (i64,)>(
            "UPDATE profiles SET credits = credits - $2 \
             WHERE id = $1 AND credits >= $2 \
             RETURNING credits",
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        // Zero affected rows covers both a short balance and a missing
        // profile; a missing profile bills as a zero balance.
        Ok(match row {
            Some((remaining,)) => DebitOutcome::Applied { remaining },
            None => DebitOutcome::InsufficientFunds,
        })
    }

    async fn record_usage(&self, user_id: Uuid, credits_spent: i64) -> PortResult<()> {
        sqlx::query("INSERT INTO credit_usage (user_id, credits_spent) VALUES ($1, $2)")
            .bind(user_id)
            .bind(credits_spent)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
