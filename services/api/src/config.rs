//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub embedding_model: String,
    pub rag_match_count: i64,
    /// Secret for verifying `Stripe-Signature` on the billing webhook.
    pub stripe_webhook_secret: String,
    /// Shared secret required on the generic renewal webhook.
    pub renewal_webhook_secret: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // Both webhook paths mutate balances, so both secrets are mandatory.
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| ConfigError::MissingVar("STRIPE_WEBHOOK_SECRET".to_string()))?;
        let renewal_webhook_secret = std::env::var("RENEWAL_WEBHOOK_SECRET")
            .map_err(|_| ConfigError::MissingVar("RENEWAL_WEBHOOK_SECRET".to_string()))?;

        // --- Load Retrieval Settings ---
        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let rag_match_count = match std::env::var("RAG_MATCH_COUNT") {
            Ok(raw) => raw.parse::<i64>().map_err(|_| {
                ConfigError::InvalidValue(
                    "RAG_MATCH_COUNT".to_string(),
                    format!("'{}' is not a valid count", raw),
                )
            })?,
            Err(_) => 3,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            embedding_model,
            rag_match_count,
            stripe_webhook_secret,
            renewal_webhook_secret,
        })
    }
}
