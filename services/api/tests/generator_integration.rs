//! End-to-end tests for the credit-metered generation path, driven through
//! the axum handlers against in-memory fakes.

mod support;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::Value;
use uuid::Uuid;

use anamnesia_core::domain::{ChatRole, AI_SENDER};
use anamnesia_core::ports::DatabaseService;
use api_lib::web::chat::{
    create_chat_handler, list_messages_handler, post_message_handler, CreateChatRequest,
    PostMessageRequest,
};
use api_lib::web::credits::credit_summary_handler;
use api_lib::web::generator::{generator_handler, GeneratorRequest, IncomingMessage};

use support::{app_state, FakeChat, MemDb};

fn generator_request(model: &str, chat_id: Option<Uuid>) -> GeneratorRequest {
    GeneratorRequest {
        model: model.to_string(),
        chat_id,
        messages: vec![IncomingMessage {
            role: Some("user".to_string()),
            sender: None,
            content: "Qual é a conduta para dor torácica?".to_string(),
        }],
        selected_objective: None,
        context_item_id: None,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn economy_generation_debits_one_credit_and_returns_content() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let chat = FakeChat::replying("Resposta gerada.");
    let state = app_state(db.clone(), chat, false);

    let result = generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o-mini", None)),
    )
    .await;

    let response = result.expect("admitted request succeeds").into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], "Resposta gerada.");
    assert_eq!(body["remainingCredits"], 9);

    // Balance b - c exactly once, one audit record of the cost.
    assert_eq!(db.credits_of(user), 9);
    assert_eq!(db.usage_records(), vec![(user, 1)]);
}

#[tokio::test]
async fn standard_model_costs_five() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let chat = FakeChat::replying("ok");
    let state = app_state(db.clone(), chat, false);

    generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o", None)),
    )
    .await
    .expect("admitted");

    assert_eq!(db.credits_of(user), 5);
    assert_eq!(db.usage_records(), vec![(user, 5)]);
}

#[tokio::test]
async fn zero_balance_is_denied_without_debit_or_audit() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 0);
    let chat = FakeChat::replying("unreachable");
    let state = app_state(db.clone(), chat.clone(), false);

    let result = generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o-mini", None)),
    )
    .await;

    let (status, Json(body)) = result.err().expect("denied");
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body.error, "Insufficient credits");

    assert_eq!(db.credits_of(user), 0);
    assert!(db.usage_records().is_empty());
    // The billable call never happened.
    assert!(chat.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_profile_is_treated_as_zero_balance() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(Uuid::new_v4(), 100);
    let state = app_state(db.clone(), FakeChat::replying("x"), false);

    let result = generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o-mini", None)),
    )
    .await;

    let (status, _) = result.err().expect("denied");
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn missing_model_is_rejected_before_any_debit() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let state = app_state(db.clone(), FakeChat::replying("x"), false);

    let mut request = generator_request("", None);
    request.model = "  ".to_string();
    let result = generator_handler(State(state), Extension(user), Json(request)).await;

    let (status, _) = result.err().expect("rejected");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(db.credits_of(user), 10);
}

#[tokio::test]
async fn upstream_failure_maps_to_bad_gateway_not_success() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let state = app_state(db.clone(), FakeChat::failing(), false);

    let result = generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o-mini", None)),
    )
    .await;

    // The transport status reflects the failure; never a 2xx with an error body.
    let (status, _) = result.err().expect("failed upstream");
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn identity_prompts_are_prepended_and_ai_reply_persisted() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let chat = FakeChat::replying("Sou a AnamnesIA.");
    let state = app_state(db.clone(), chat.clone(), false);

    let chat_row = db
        .create_chat(Uuid::new_v4(), user, Some("t"), Some("gpt-4o-mini"))
        .await
        .unwrap();

    generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o-mini", Some(chat_row.id))),
    )
    .await
    .expect("admitted");

    // The forwarded prompt opens with the system prefix and ends with the
    // conversation.
    let prompts = chat.prompts.lock().unwrap();
    let sent = &prompts[0];
    assert!(sent.len() >= 4);
    assert!(sent[0].content.contains("AnamnesIA"));
    assert!(sent[..sent.len() - 1]
        .iter()
        .all(|m| m.role == ChatRole::System));
    assert_eq!(sent.last().unwrap().role, ChatRole::User);

    // The AI reply landed in the chat with the model recorded.
    let messages = db.list_messages(chat_row.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, AI_SENDER);
    assert_eq!(messages[0].content, "Sou a AnamnesIA.");
    assert_eq!(messages[0].model_id.as_deref(), Some("gpt-4o-mini"));
}

#[tokio::test]
async fn retrieval_failure_degrades_to_no_context() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let chat = FakeChat::replying("ok");
    // Embedding provider down: the request still completes, minus retrieval.
    let state = app_state(db.clone(), chat.clone(), true);

    generator_handler(
        State(state),
        Extension(user),
        Json(generator_request("gpt-4o-mini", None)),
    )
    .await
    .expect("still admitted");

    let prompts = chat.prompts.lock().unwrap();
    assert!(prompts[0]
        .iter()
        .all(|m| !m.content.starts_with("Context:")));
}

#[tokio::test]
async fn create_chat_charges_flat_one_credit() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 3);
    let state = app_state(db.clone(), FakeChat::replying("x"), false);

    let result = create_chat_handler(
        State(state),
        Extension(user),
        Json(CreateChatRequest {
            prompt: "Olá".to_string(),
            model: "gpt-4o".to_string(),
            context_id: None,
        }),
    )
    .await;

    let response = result.expect("created").into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let chat_id: Uuid = body["chatId"].as_str().unwrap().parse().unwrap();

    // Flat charge of one credit regardless of the model.
    assert_eq!(db.credits_of(user), 2);
    assert_eq!(db.usage_records(), vec![(user, 1)]);

    // Opening user message exists and references the chat.
    let messages = db.list_messages(chat_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, user.to_string());
}

#[tokio::test]
async fn create_chat_with_empty_balance_is_denied() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 0);
    let state = app_state(db.clone(), FakeChat::replying("x"), false);

    let result = create_chat_handler(
        State(state),
        Extension(user),
        Json(CreateChatRequest {
            prompt: "Olá".to_string(),
            model: "gpt-4o-mini".to_string(),
            context_id: None,
        }),
    )
    .await;

    let (status, _) = result.err().expect("denied");
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(db.chats.lock().unwrap().is_empty());
}

#[tokio::test]
async fn message_append_requires_sender_and_content() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 5);
    let state = app_state(db.clone(), FakeChat::replying("x"), false);
    let chat_row = db
        .create_chat(Uuid::new_v4(), user, None, None)
        .await
        .unwrap();

    let result = post_message_handler(
        State(state),
        Extension(user),
        Path(chat_row.id),
        Json(PostMessageRequest {
            sender: Some(user.to_string()),
            content: None,
        }),
    )
    .await;

    let (status, _) = result.err().expect("rejected");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(db.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn another_users_chat_is_invisible_and_unwritable() {
    let owner = Uuid::new_v4();
    let db = MemDb::with_profile(owner, 5);
    let state = app_state(db.clone(), FakeChat::replying("x"), false);
    let chat_row = db
        .create_chat(Uuid::new_v4(), owner, Some("t"), None)
        .await
        .unwrap();
    db.insert_message(chat_row.id, Some(owner), &owner.to_string(), "privado", None)
        .await
        .unwrap();

    // A different authenticated user gets the same 404 as for a missing chat.
    let intruder = Uuid::new_v4();
    let result = list_messages_handler(
        State(state.clone()),
        Extension(intruder),
        Path(chat_row.id),
    )
    .await;
    let (status, _) = result.err().expect("hidden");
    assert_eq!(status, StatusCode::NOT_FOUND);

    let result = post_message_handler(
        State(state.clone()),
        Extension(intruder),
        Path(chat_row.id),
        Json(PostMessageRequest {
            sender: Some(intruder.to_string()),
            content: Some("intruso".to_string()),
        }),
    )
    .await;
    let (status, _) = result.err().expect("hidden");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(db.messages.lock().unwrap().len(), 1);

    // The owner still reads and writes normally.
    list_messages_handler(State(state.clone()), Extension(owner), Path(chat_row.id))
        .await
        .expect("owner reads");
    post_message_handler(
        State(state),
        Extension(owner),
        Path(chat_row.id),
        Json(PostMessageRequest {
            sender: Some(owner.to_string()),
            content: Some("segue".to_string()),
        }),
    )
    .await
    .expect("owner writes");
}

#[tokio::test]
async fn credit_summary_reflects_audited_usage() {
    let user = Uuid::new_v4();
    let db = MemDb::with_profile(user, 10);
    let state = app_state(db.clone(), FakeChat::replying("ok"), false);

    db.apply_renewal(user, 100).await.unwrap();
    generator_handler(
        State(state.clone()),
        Extension(user),
        Json(generator_request("gpt-4o", None)),
    )
    .await
    .expect("admitted");

    let response = credit_summary_handler(State(state), Extension(user))
        .await
        .expect("summary")
        .into_response();
    let body = body_json(response).await;
    assert_eq!(body["monthlyUsed"], 5);
    assert_eq!(body["monthlyTotal"], 100);
    assert_eq!(body["monthlyRemaining"], 95);
    assert_eq!(body["extraCredits"], 5);
}
