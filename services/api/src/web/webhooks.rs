//! services/api/src/web/webhooks.rs
//!
//! Billing webhooks: the Stripe-signed subscription path and the generic
//! renewal path. Both mutate balances, so both are authenticated — Stripe by
//! signature, the generic path by a shared secret header.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use anamnesia_core::ports::PortError;

use crate::web::{state::AppState, ApiFailure, ErrorBody};

/// Metadata key carrying the monthly allotment on the subscription object.
const CREDITS_METADATA_KEY: &str = "creditos_mensais";

/// Shared-secret header on the generic renewal webhook.
pub const RENEWAL_SECRET_HEADER: &str = "x-webhook-secret";

/// Maximum age of a signed Stripe event before it is rejected as stale.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

//=========================================================================================
// Stripe Signature Verification
//=========================================================================================

/// The parsed contents of a `Stripe-Signature` header: the timestamp and the
/// `v1` signatures (hex-encoded HMAC-SHA256 digests).
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub v1_signatures: Vec<String>,
}

/// Parses a `Stripe-Signature` header of the form `t=...,v1=...[,v1=...]`.
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut v1_signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => v1_signatures.push(value.to_string()),
            _ => {}
        }
    }
    let timestamp = timestamp?;
    if v1_signatures.is_empty() {
        return None;
    }
    Some(SignatureHeader {
        timestamp,
        v1_signatures,
    })
}

/// Verifies a signed payload: HMAC-SHA256 over `"{t}.{body}"` must match one
/// of the `v1` signatures, and the timestamp must be within tolerance of
/// `now_unix`. The comparison is constant-time via `verify_slice`.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &str,
    header: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> bool {
    let Some(parsed) = parse_signature_header(header) else {
        return false;
    };
    if (now_unix - parsed.timestamp).abs() > tolerance_secs {
        return false;
    }

    let signed_payload = format!("{}.{}", parsed.timestamp, payload);
    for candidate in &parsed.v1_signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&expected).is_ok() {
            return true;
        }
    }
    false
}

/// Computes the hex-encoded `v1` signature for a payload; used to construct
/// test fixtures and outgoing signed requests.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

//=========================================================================================
// Payload Types
//=========================================================================================

#[derive(Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: StripeSubscriptionObject,
}

#[derive(Deserialize)]
struct StripeSubscriptionObject {
    customer: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Serialize, ToSchema)]
pub struct StripeWebhookResponse {
    pub received: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenewalRequest {
    pub user_id: Option<Uuid>,
    pub plan_credits: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct RenewalResponse {
    pub success: bool,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/webhooks/stripe - Signed subscription lifecycle events.
///
/// On `customer.subscription.created|updated` the profile keyed by the Stripe
/// customer id gets its monthly allotment set from the event metadata and its
/// period usage reset. Re-delivery of the same event is a no-op state-wise.
#[utoipa::path(
    post,
    path = "/api/webhooks/stripe",
    responses(
        (status = 200, description = "Event processed", body = StripeWebhookResponse),
        (status = 400, description = "Invalid signature or payload", body = ErrorBody),
        (status = 500, description = "Database update failed", body = ErrorBody)
    )
)]
pub async fn stripe_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiFailure> {
    // 1. Verify the signature before trusting any metadata
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ErrorBody::new(StatusCode::BAD_REQUEST, "Missing Stripe-Signature"))?;

    let verified = verify_stripe_signature(
        &state.config.stripe_webhook_secret,
        &body,
        signature,
        Utc::now().timestamp(),
        SIGNATURE_TOLERANCE_SECS,
    );
    if !verified {
        warn!("Stripe signature verification failed");
        return Err(ErrorBody::new(StatusCode::BAD_REQUEST, "Invalid signature"));
    }

    // 2. Parse the event
    let event: StripeEvent = serde_json::from_str(&body)
        .map_err(|_| ErrorBody::new(StatusCode::BAD_REQUEST, "Invalid payload"))?;

    // 3. Handle subscription renewals; every other event type is acknowledged
    if event.event_type == "customer.subscription.created"
        || event.event_type == "customer.subscription.updated"
    {
        let subscription = event.data.object;
        let credits = subscription
            .metadata
            .get(CREDITS_METADATA_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        match state
            .db
            .apply_renewal_by_customer(&subscription.customer, credits)
            .await
        {
            Ok(()) => {}
            Err(PortError::NotFound(msg)) => {
                // Unknown customer: acknowledge so the provider stops retrying.
                warn!("Stripe renewal for unknown customer: {}", msg);
            }
            Err(e) => {
                error!("Stripe renewal update failed: {:?}", e);
                return Err(ErrorBody::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database update failed",
                ));
            }
        }
    }

    Ok(Json(StripeWebhookResponse { received: true }))
}

/// POST /api/webhooks/renewal - Generic renewal events.
///
/// Requires the shared secret header; the payload carries the user id and the
/// new monthly allotment. Applying the same payload twice yields the same end
/// state (a set, not an increment).
#[utoipa::path(
    post,
    path = "/api/webhooks/renewal",
    request_body = RenewalRequest,
    responses(
        (status = 200, description = "Renewal applied", body = RenewalResponse),
        (status = 400, description = "Missing or invalid userId or planCredits", body = ErrorBody),
        (status = 401, description = "Missing or wrong shared secret", body = ErrorBody),
        (status = 404, description = "Unknown user", body = ErrorBody),
        (status = 500, description = "Database update failed", body = ErrorBody)
    )
)]
pub async fn renewal_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RenewalRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    // 1. Shared-secret check; this path affects balances and is not
    //    otherwise signed.
    let presented = headers
        .get(RENEWAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.config.renewal_webhook_secret.as_str()) {
        warn!("Renewal webhook rejected: bad shared secret");
        return Err(ErrorBody::new(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    // 2. Validate payload
    let (user_id, plan_credits) = match (req.user_id, req.plan_credits) {
        (Some(u), Some(c)) if c >= 0 => (u, c),
        _ => {
            return Err(ErrorBody::new(
                StatusCode::BAD_REQUEST,
                "Missing or invalid userId or planCredits",
            ))
        }
    };

    // 3. Apply the renewal
    match state.db.apply_renewal(user_id, plan_credits).await {
        Ok(()) => Ok(Json(RenewalResponse { success: true })),
        Err(PortError::NotFound(_)) => {
            Err(ErrorBody::new(StatusCode::NOT_FOUND, "Unknown user"))
        }
        Err(e) => {
            error!("Renewal update failed: {:?}", e);
            Err(ErrorBody::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database update failed",
            ))
        }
    }
}
