//! End-to-end grant flow against a real (temporary) database file:
//! register → reconcile on one rail → duplicate on the other rail →
//! entitlement visible to the gate and the broadcast recipient filter.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use roundnote_bot::entitlement::{Decision, Gate};
use roundnote_bot::payments::{GrantNotifier, ReconcileOutcome, Reconciler, SettledInvoice};
use roundnote_bot::store::{self, InvoiceLedger, PaymentRail, UserStore};

#[derive(Clone)]
struct NoopNotifier;

impl GrantNotifier for NoopNotifier {
    async fn notify_granted(&self, _user_id: i64, _new_expiry: NaiveDate) -> Result<()> {
        Ok(())
    }
}

fn temp_db_url() -> (String, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("roundnote-it-{}.db", Uuid::new_v4()));
    (format!("sqlite://{}?mode=rwc", path.display()), path)
}

#[tokio::test]
async fn settled_invoice_becomes_a_single_durable_grant() {
    let (url, path) = temp_db_url();
    let pool = store::connect(&url).await.expect("open database");

    let users = UserStore::new(pool.clone());
    let ledger = InvoiceLedger::new(pool);
    let reconciler = Reconciler::new(users.clone(), ledger, NoopNotifier, 365);
    let gate = Gate::new(users.clone(), 3);

    let now = Utc::now();
    let today = now.date_naive();

    users.get_or_create(42, Some("buyer"), Some("Buyer")).await.unwrap();
    users.get_or_create(7, None, None).await.unwrap();

    // The push driver lands first...
    let via_push = SettledInvoice {
        external_id: "INV-1".to_string(),
        payload: "premium-sub_42".to_string(),
        rail: PaymentRail::Stars,
    };
    let outcome = reconciler.reconcile(&via_push, now).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Granted {
            user_id: 42,
            new_expiry: today + Duration::days(365)
        }
    );

    // ...and the poll driver sees the same settlement a tick later.
    let via_poll = SettledInvoice {
        rail: PaymentRail::Crypto,
        ..via_push.clone()
    };
    assert_eq!(
        reconciler.reconcile(&via_poll, now).await.unwrap(),
        ReconcileOutcome::Duplicate
    );

    // The gate sees the entitlement without any quota accounting.
    assert_eq!(
        gate.authorize(42, now).await.unwrap(),
        Decision::Allow { counted: false }
    );

    // The broadcast recipient filter no longer includes the buyer.
    assert_eq!(users.non_premium_ids(today).await.unwrap(), vec![7]);

    drop(users);
    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn renewal_stacks_across_process_restarts() {
    let (url, path) = temp_db_url();
    let now = Utc::now();
    let today = now.date_naive();

    // First run: initial purchase.
    {
        let pool = store::connect(&url).await.expect("open database");
        let users = UserStore::new(pool.clone());
        let reconciler =
            Reconciler::new(users.clone(), InvoiceLedger::new(pool), NoopNotifier, 365);

        users.get_or_create(42, None, None).await.unwrap();
        let inv = SettledInvoice {
            external_id: "INV-A".to_string(),
            payload: "premium-sub_42".to_string(),
            rail: PaymentRail::Crypto,
        };
        reconciler.reconcile(&inv, now).await.unwrap();
    }

    // Second run: the renewal stacks on the persisted expiry, and the old
    // invoice is still a duplicate.
    {
        let pool = store::connect(&url).await.expect("reopen database");
        let users = UserStore::new(pool.clone());
        let reconciler =
            Reconciler::new(users.clone(), InvoiceLedger::new(pool), NoopNotifier, 365);

        let replay = SettledInvoice {
            external_id: "INV-A".to_string(),
            payload: "premium-sub_42".to_string(),
            rail: PaymentRail::Crypto,
        };
        assert_eq!(
            reconciler.reconcile(&replay, now).await.unwrap(),
            ReconcileOutcome::Duplicate
        );

        let renewal = SettledInvoice {
            external_id: "INV-B".to_string(),
            payload: "premium-sub_42".to_string(),
            rail: PaymentRail::Stars,
        };
        assert_eq!(
            reconciler.reconcile(&renewal, now).await.unwrap(),
            ReconcileOutcome::Granted {
                user_id: 42,
                new_expiry: today + Duration::days(730)
            }
        );
    }

    std::fs::remove_file(path).ok();
}
