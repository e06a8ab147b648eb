//! Idempotent conversion of settled invoices into entitlement grants
//!
//! Write-ahead, best-effort apply: the ledger insert is durable before any
//! attempt to apply the grant, so a malformed or partially-failed grant is
//! never silently retried. Duplicate observations — the poll and push
//! drivers may both see the same settlement — are no-ops after the first.

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod reconcile_tests;

use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::payments::parse_grant_payload;
use crate::store::{InvoiceLedger, PaymentRail, UserStore};

/// A provider-settled payment, normalized across rails.
#[derive(Debug, Clone)]
pub struct SettledInvoice {
    /// Provider-issued id, globally unique — the ledger's dedup key.
    pub external_id: String,
    /// Opaque payload naming the beneficiary (`premium-sub_<userId>`).
    pub payload: String,
    pub rail: PaymentRail,
}

/// Delivery seam for the post-grant notification.
///
/// One trait, one operation — implement this to replace the Telegram send
/// in tests. Notification failure never rolls a grant back.
pub trait GrantNotifier: Send + Sync + Clone + 'static {
    fn notify_granted(
        &self,
        user_id: i64,
        new_expiry: NaiveDate,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First observation: entitlement extended to the returned expiry.
    Granted { user_id: i64, new_expiry: NaiveDate },
    /// Already in the ledger — nothing done.
    Duplicate,
    /// Recorded in the ledger but not applied (malformed payload or
    /// unknown beneficiary). By design this is never retried.
    Discarded,
}

#[derive(Clone)]
pub struct Reconciler<N> {
    users: UserStore,
    ledger: InvoiceLedger,
    notifier: N,
    premium_days: i64,
}

impl<N: GrantNotifier> Reconciler<N> {
    pub fn new(users: UserStore, ledger: InvoiceLedger, notifier: N, premium_days: i64) -> Self {
        Self {
            users,
            ledger,
            notifier,
            premium_days,
        }
    }

    /// Convert one observed settlement into a durable grant, exactly once.
    ///
    /// Only the ledger insert may fail the call: without a durable "seen"
    /// mark the user record must not be touched, and the caller's driver
    /// will naturally re-observe the invoice later. Every error after the
    /// insert is absorbed — the entry stands and the invoice is settled as
    /// far as this system is concerned.
    pub async fn reconcile(
        &self,
        invoice: &SettledInvoice,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let first = self
            .ledger
            .try_insert(&invoice.external_id, &invoice.payload, invoice.rail, now)
            .await?;

        if !first {
            debug!(external_id = %invoice.external_id, "invoice already reconciled");
            return Ok(ReconcileOutcome::Duplicate);
        }

        match self.apply(invoice, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    external_id = %invoice.external_id,
                    error = %e,
                    "grant not applied; ledger entry stands"
                );
                Ok(ReconcileOutcome::Discarded)
            }
        }
    }

    async fn apply(
        &self,
        invoice: &SettledInvoice,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let Some(user_id) = parse_grant_payload(&invoice.payload) else {
            warn!(
                external_id = %invoice.external_id,
                payload = %invoice.payload,
                "invoice payload is malformed"
            );
            return Ok(ReconcileOutcome::Discarded);
        };

        let Some(record) = self.users.get(user_id).await? else {
            warn!(
                external_id = %invoice.external_id,
                user_id,
                "grant beneficiary unknown"
            );
            return Ok(ReconcileOutcome::Discarded);
        };

        let today = now.date_naive();

        // Stacking renewal: a live entitlement extends from its current
        // expiry, an absent or lapsed one restarts from today.
        let base = record.premium_expiry.filter(|d| *d >= today).unwrap_or(today);
        let new_expiry = base + Duration::days(self.premium_days);

        self.users.extend_premium(user_id, new_expiry).await?;
        info!(
            user_id,
            %new_expiry,
            rail = invoice.rail.as_str(),
            external_id = %invoice.external_id,
            "premium entitlement extended"
        );

        // The grant is already durable; a failed notification (blocked
        // bot, closed chat) is the beneficiary's loss only.
        if let Err(e) = self.notifier.notify_granted(user_id, new_expiry).await {
            warn!(user_id, error = %e, "grant notification failed");
        }

        Ok(ReconcileOutcome::Granted {
            user_id,
            new_expiry,
        })
    }
}
