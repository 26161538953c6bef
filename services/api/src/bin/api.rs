//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        chat_llm::OpenAiChatAdapter, db::DbAdapter, embeddings::OpenAiEmbeddingAdapter,
    },
    audit::spawn_audit_writer,
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        chat::{
            create_chat_handler, list_chats_handler, list_messages_handler, post_message_handler,
        },
        credits::credit_summary_handler,
        generator::generator_handler,
        middleware::require_auth,
        state::AppState,
        webhooks::{renewal_webhook_handler, stripe_webhook_handler},
        ApiDoc,
    },
};
use anamnesia_core::credits::RequestGate;
use anamnesia_core::ports::{AuditSink, CreditLedger};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let chat_adapter = Arc::new(OpenAiChatAdapter::new(openai_client.clone()));
    let embedding_adapter = Arc::new(OpenAiEmbeddingAdapter::new(
        openai_client.clone(),
        config.embedding_model.clone(),
    ));

    // --- 4. Wire the Credit Gate and the Audit Writer ---
    let ledger: Arc<dyn CreditLedger> = db_adapter.clone();
    let (audit_queue, _audit_task) = spawn_audit_writer(ledger.clone());
    let audit: Arc<dyn AuditSink> = Arc::new(audit_queue);
    let gate = Arc::new(RequestGate::new(ledger, audit));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        config: config.clone(),
        gate,
        chat_llm: chat_adapter,
        embeddings: embedding_adapter,
    });

    let cors = CorsLayer::new()
        .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth middleware; webhooks authenticate themselves)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/api/webhooks/stripe", post(stripe_webhook_handler))
        .route("/api/webhooks/renewal", post(renewal_webhook_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/api/generator", post(generator_handler))
        .route("/api/chat/create", post(create_chat_handler))
        .route("/api/chat/{chat_id}/message", post(post_message_handler))
        .route("/api/chat/{chat_id}/messages", get(list_messages_handler))
        .route("/api/chats", get(list_chats_handler))
        .route("/api/credits/summary", get(credit_summary_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
