//! crates/anamnesia_core/src/credits.rs
//!
//! The credit/quota policy engine: the cost policy and the request gate that
//! decides whether a billable operation may proceed.

use uuid::Uuid;

use crate::ports::{AuditSink, CreditLedger, DebitOutcome, PortResult};

//=========================================================================================
// Cost Policy
//=========================================================================================

/// The model identifier billed at the economy rate.
pub const ECONOMY_MODEL: &str = "gpt-4o-mini";

/// Credit cost of the economy model.
pub const ECONOMY_COST: i64 = 1;

/// Credit cost of every other model.
pub const STANDARD_COST: i64 = 5;

/// Maps a model identifier to its credit cost.
///
/// Total over all inputs: unknown identifiers bill at the standard rate rather
/// than failing, so an unrecognized-but-valid upstream model name never blocks
/// a request.
pub fn model_cost(model: &str) -> i64 {
    if model == ECONOMY_MODEL {
        ECONOMY_COST
    } else {
        STANDARD_COST
    }
}

//=========================================================================================
// Request Gate
//=========================================================================================

/// The admission decision for one billable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The debit was applied; the caller may proceed with the billable action.
    Admitted { cost: i64, remaining: i64 },
    /// The balance did not cover the cost. No debit was applied.
    Denied,
}

/// Orchestrates cost policy, the atomic conditional debit, and the audit
/// event for one billable request.
///
/// On admission exactly one debit is applied and exactly one audit event is
/// submitted; on denial or ledger failure nothing is written and the caller
/// must not proceed with the billable action.
pub struct RequestGate<L, A> {
    ledger: L,
    audit: A,
}

impl<L, A> RequestGate<L, A>
where
    L: AsRef<dyn CreditLedger>,
    A: AsRef<dyn AuditSink>,
{
    pub fn new(ledger: L, audit: A) -> Self {
        Self { ledger, audit }
    }

    /// Admits or denies a billable request for `model` by `user_id`.
    pub async fn admit(&self, user_id: Uuid, model: &str) -> PortResult<Admission> {
        let cost = model_cost(model);
        self.admit_with_cost(user_id, cost).await
    }

    /// Admits or denies a request with an explicit cost (e.g. the flat
    /// one-credit charge for starting a chat).
    pub async fn admit_with_cost(&self, user_id: Uuid, cost: i64) -> PortResult<Admission> {
        match self.ledger.as_ref().try_debit(user_id, cost).await? {
            DebitOutcome::Applied { remaining } => {
                tracing::debug!(%user_id, cost, remaining, "credit debit applied");
                self.audit.as_ref().submit(user_id, cost);
                Ok(Admission::Admitted { cost, remaining })
            }
            DebitOutcome::InsufficientFunds => {
                tracing::info!(%user_id, cost, "admission denied: insufficient credits");
                Ok(Admission::Denied)
            }
        }
    }
}

//=========================================================================================
// Tests
//=========================================================================================
