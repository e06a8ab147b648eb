//! Poll driver: periodic sweep of the provider's paid-invoice feed
//!
//! Runs as an independent background task for the process lifetime, sharing
//! the runtime with the dispatcher. A failed fetch is logged and retried on
//! the next tick; a failed reconcile never breaks the loop — the ledger
//! already decides what is new and what is a replay.

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::payments::cryptopay::CryptoPayClient;
use crate::payments::reconcile::{GrantNotifier, Reconciler, SettledInvoice};
use crate::store::PaymentRail;

pub struct InvoicePoller<N> {
    client: CryptoPayClient,
    reconciler: Reconciler<N>,
    interval: std::time::Duration,
}

impl<N: GrantNotifier> InvoicePoller<N> {
    pub fn new(
        client: CryptoPayClient,
        reconciler: Reconciler<N>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            client,
            reconciler,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "paid-invoice sweep failed, retrying next tick");
            }
        }
    }

    async fn sweep(&self) -> anyhow::Result<()> {
        let invoices = self.client.get_paid_invoices().await?;
        debug!(count = invoices.len(), "swept paid invoices");
        let now = Utc::now();

        for inv in invoices {
            let settled = SettledInvoice {
                external_id: inv.invoice_id.to_string(),
                payload: inv.payload.unwrap_or_default(),
                rail: PaymentRail::Crypto,
            };
            if let Err(e) = self.reconciler.reconcile(&settled, now).await {
                warn!(
                    external_id = %settled.external_id,
                    error = %e,
                    "reconcile failed for polled invoice"
                );
            }
        }

        Ok(())
    }
}
