//! services/api/src/audit.rs
//!
//! Background writer for the credit-usage audit log.
//!
//! Admitted debits submit an event here instead of inserting inline; a
//! background task drains the queue and retries each insert with exponential
//! backoff. After the final attempt the event is logged as a dead letter and
//! dropped, so the audit total can only ever under-count applied debits.

use anamnesia_core::ports::{AuditSink, CreditLedger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct AuditEvent {
    user_id: Uuid,
    credits_spent: i64,
}

/// Retry behaviour for audit inserts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Queue handle given to the request gate; cheap to clone.
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditSink for AuditQueue {
    fn submit(&self, user_id: Uuid, credits_spent: i64) {
        let event = AuditEvent {
            user_id,
            credits_spent,
        };
        if self.tx.send(event).is_err() {
            // Writer task is gone; the debit stays applied, the audit row is lost.
            error!(%user_id, credits_spent, "audit writer stopped, dropping usage record");
        }
    }
}

/// Spawns the audit writer task with the default retry policy.
pub fn spawn_audit_writer(ledger: Arc<dyn CreditLedger>) -> (AuditQueue, JoinHandle<()>) {
    spawn_audit_writer_with_policy(ledger, RetryPolicy::default())
}

/// Spawns the audit writer task. The task exits once all queue handles are
/// dropped and the queue is drained.
pub fn spawn_audit_writer_with_policy(
    ledger: Arc<dyn CreditLedger>,
    policy: RetryPolicy,
) -> (AuditQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            write_with_retry(ledger.as_ref(), event, policy).await;
        }
    });
    (AuditQueue { tx }, handle)
}

async fn write_with_retry(ledger: &dyn CreditLedger, event: AuditEvent, policy: RetryPolicy) {
    let mut backoff = policy.initial_backoff;
    for attempt in 1..=policy.max_attempts {
        match ledger.record_usage(event.user_id, event.credits_spent).await {
            Ok(()) => return,
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    user_id = %event.user_id,
                    attempt,
                    error = %e,
                    "audit insert failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                // Dead letter: the full record goes to the log so the trail
                // can be reconstructed by hand.
                error!(
                    user_id = %event.user_id,
                    credits_spent = event.credits_spent,
                    error = %e,
                    "audit insert dead-lettered after {} attempts",
                    policy.max_attempts
                );
            }
        }
    }
}
