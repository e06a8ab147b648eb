//! Entitlement and daily-quota gate
//!
//! Every conversion request passes through [`Gate::authorize`] before any
//! resource is acquired. Entitlement is recomputed from `premium_expiry` on
//! every call — there is no background expiry sweep, and the stored
//! `is_premium` flag is only a cache that this module self-heals. The quota
//! counter is lazily reset on the first request of each calendar day.

#[cfg(test)]
#[path = "entitlement_tests.rs"]
mod entitlement_tests;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::store::{UserRecord, UserStore};

/// Outcome of the gate check for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed. `counted` is true when a successful job must consume one
    /// unit of the daily free quota; entitled users run uncounted.
    Allow { counted: bool },
    /// Reject without acquiring any resources.
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    QuotaExhausted,
}

/// Result of evaluating one record: the decision plus whether the record
/// was mutated (lazy reset or self-heal) and must be persisted.
#[derive(Debug)]
pub struct Evaluation {
    pub decision: Decision,
    pub dirty: bool,
}

/// True while the user holds a live entitlement. Pure in
/// (`premium_expiry`, `today`); ignores the stored flag.
pub fn entitled(record: &UserRecord, today: NaiveDate) -> bool {
    record.premium_expiry.is_some_and(|expiry| expiry >= today)
}

/// The decision algorithm, pure over one record.
///
/// Mutates the record in place for the lazy quota reset and the
/// `is_premium` self-heal; the caller must persist the record before using
/// the decision when `dirty` is set.
pub fn evaluate(record: &mut UserRecord, today: NaiveDate, free_quota: i64) -> Evaluation {
    let mut dirty = false;

    // Lazy reset: there is no daily cron, every request pays the reset
    // cost for its own user.
    if record.last_quota_date != Some(today) {
        record.quota_used_today = 0;
        record.last_quota_date = Some(today);
        dirty = true;
    }

    // The only place expiry is enforced.
    let is_entitled = entitled(record, today);
    if record.is_premium != is_entitled {
        record.is_premium = is_entitled;
        dirty = true;
    }

    let decision = if is_entitled {
        Decision::Allow { counted: false }
    } else if record.quota_used_today < free_quota {
        Decision::Allow { counted: true }
    } else {
        Decision::Deny(DenyReason::QuotaExhausted)
    };

    Evaluation { decision, dirty }
}

/// Stateful gate bound to the user store.
#[derive(Clone)]
pub struct Gate {
    store: UserStore,
    free_quota: i64,
}

impl Gate {
    pub fn new(store: UserStore, free_quota: i64) -> Self {
        Self { store, free_quota }
    }

    /// Run the decision algorithm against one record.
    ///
    /// The reset/self-heal write is durable before the decision is
    /// returned, even on Deny — otherwise a user stuck at the boundary
    /// date would never reset.
    pub async fn authorize(&self, user_id: i64, now: DateTime<Utc>) -> Result<Decision> {
        let today = now.date_naive();
        let mut record = self
            .store
            .get(user_id)
            .await?
            .with_context(|| format!("gate check for unknown user {}", user_id))?;

        let evaluation = evaluate(&mut record, today, self.free_quota);
        if evaluation.dirty {
            self.store.save_gate_state(&record).await?;
        }

        debug!(user_id, decision = ?evaluation.decision, "gate decision");
        Ok(evaluation.decision)
    }

    /// Consume one quota unit after the downstream work succeeded.
    ///
    /// No-op for uncounted (entitled) decisions; never called before the
    /// job delivers, so failed jobs cost nothing.
    pub async fn charge(&self, user_id: i64, decision: Decision, now: DateTime<Utc>) -> Result<()> {
        if let Decision::Allow { counted: true } = decision {
            self.store.charge(user_id, now.date_naive()).await?;
        }
        Ok(())
    }
}
