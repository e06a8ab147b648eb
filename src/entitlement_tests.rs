#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use crate::entitlement::{entitled, evaluate, Decision, DenyReason, Gate};
    use crate::store::{memory_pool, UserRecord, UserStore};

    const QUOTA: i64 = 3;

    fn day(s: &str) -> NaiveDate {
        s.parse().expect("date literal")
    }

    fn record() -> UserRecord {
        UserRecord {
            id: 42,
            username: None,
            first_name: None,
            joined_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            is_premium: false,
            premium_expiry: None,
            quota_used_today: 0,
            last_quota_date: None,
        }
    }

    // ── evaluate(): pure decision logic ──────────────────────────────────────

    #[test]
    fn fresh_user_is_allowed_and_counted() {
        let mut rec = record();
        let eval = evaluate(&mut rec, day("2025-06-01"), QUOTA);
        assert_eq!(eval.decision, Decision::Allow { counted: true });
        assert!(eval.dirty); // first contact sets last_quota_date
        assert_eq!(rec.last_quota_date, Some(day("2025-06-01")));
    }

    #[test]
    fn quota_resets_on_a_new_day() {
        let mut rec = record();
        rec.quota_used_today = 3;
        rec.last_quota_date = Some(day("2025-06-01"));

        let eval = evaluate(&mut rec, day("2025-06-02"), QUOTA);

        assert_eq!(eval.decision, Decision::Allow { counted: true });
        assert_eq!(rec.quota_used_today, 0);
        assert_eq!(rec.last_quota_date, Some(day("2025-06-02")));
    }

    #[test]
    fn exhausted_quota_is_denied_same_day() {
        let mut rec = record();
        rec.quota_used_today = 3;
        rec.last_quota_date = Some(day("2025-06-01"));

        let eval = evaluate(&mut rec, day("2025-06-01"), QUOTA);

        assert_eq!(eval.decision, Decision::Deny(DenyReason::QuotaExhausted));
        assert!(!eval.dirty);
    }

    #[test]
    fn evaluation_is_idempotent_without_a_charge() {
        let mut rec = record();
        let today = day("2025-06-01");

        let first = evaluate(&mut rec, today, QUOTA);
        let second = evaluate(&mut rec, today, QUOTA);

        assert_eq!(first.decision, second.decision);
        // The second pass has nothing left to reset
        assert!(first.dirty);
        assert!(!second.dirty);
    }

    #[test]
    fn entitled_user_runs_uncounted_regardless_of_quota() {
        let mut rec = record();
        rec.quota_used_today = 3;
        rec.last_quota_date = Some(day("2025-06-01"));
        rec.premium_expiry = Some(day("2025-12-31"));

        let eval = evaluate(&mut rec, day("2025-06-01"), QUOTA);

        assert_eq!(eval.decision, Decision::Allow { counted: false });
        // Self-heal: the stored flag catches up with the derived fact
        assert!(rec.is_premium);
        assert!(eval.dirty);
    }

    #[test]
    fn expiry_today_still_counts_as_entitled() {
        let mut rec = record();
        rec.premium_expiry = Some(day("2025-06-01"));

        let eval = evaluate(&mut rec, day("2025-06-01"), QUOTA);

        assert_eq!(eval.decision, Decision::Allow { counted: false });
    }

    #[test]
    fn stale_premium_flag_is_healed_on_expiry() {
        let mut rec = record();
        rec.is_premium = true;
        rec.premium_expiry = Some(day("2025-05-01"));
        rec.quota_used_today = 3;
        rec.last_quota_date = Some(day("2025-06-01"));

        let eval = evaluate(&mut rec, day("2025-06-01"), QUOTA);

        // Expired since last check: flag corrected, quota applies again
        assert!(!rec.is_premium);
        assert!(eval.dirty);
        assert_eq!(eval.decision, Decision::Deny(DenyReason::QuotaExhausted));
    }

    #[test]
    fn entitled_is_pure_in_expiry_and_date() {
        let mut rec = record();
        rec.is_premium = true; // stale flag must be ignored
        assert!(!entitled(&rec, day("2025-06-01")));

        rec.premium_expiry = Some(day("2025-06-02"));
        assert!(entitled(&rec, day("2025-06-01")));
        assert!(entitled(&rec, day("2025-06-02")));
        assert!(!entitled(&rec, day("2025-06-03")));
    }

    // ── Gate: durable writes ─────────────────────────────────────────────────

    #[tokio::test]
    async fn authorize_persists_the_reset_even_on_deny() {
        let store = UserStore::new(memory_pool().await);
        let gate = Gate::new(store.clone(), QUOTA);
        let now = Utc::now();
        let yesterday = now.date_naive() - Duration::days(1);

        let mut rec = store.get_or_create(42, None, None).await.unwrap();
        rec.quota_used_today = 3;
        rec.last_quota_date = Some(yesterday);
        store.save_gate_state(&rec).await.unwrap();

        // New day: reset applies, three fresh uses available
        assert_eq!(
            gate.authorize(42, now).await.unwrap(),
            Decision::Allow { counted: true }
        );
        let saved = store.get(42).await.unwrap().unwrap();
        assert_eq!(saved.quota_used_today, 0);
        assert_eq!(saved.last_quota_date, Some(now.date_naive()));
    }

    #[tokio::test]
    async fn charge_applies_only_to_counted_decisions() {
        let store = UserStore::new(memory_pool().await);
        let gate = Gate::new(store.clone(), QUOTA);
        let now = Utc::now();
        store.get_or_create(42, None, None).await.unwrap();

        let decision = gate.authorize(42, now).await.unwrap();
        gate.charge(42, decision, now).await.unwrap();
        assert_eq!(store.get(42).await.unwrap().unwrap().quota_used_today, 1);

        // Entitled decision charges nothing
        store
            .extend_premium(42, now.date_naive() + Duration::days(30))
            .await
            .unwrap();
        let decision = gate.authorize(42, now).await.unwrap();
        assert_eq!(decision, Decision::Allow { counted: false });
        gate.charge(42, decision, now).await.unwrap();
        assert_eq!(store.get(42).await.unwrap().unwrap().quota_used_today, 1);
    }

    #[tokio::test]
    async fn charging_never_exceeds_quota_within_one_day() {
        let store = UserStore::new(memory_pool().await);
        let gate = Gate::new(store.clone(), QUOTA);
        let now = Utc::now();
        store.get_or_create(42, None, None).await.unwrap();

        for _ in 0..3 {
            let decision = gate.authorize(42, now).await.unwrap();
            assert_eq!(decision, Decision::Allow { counted: true });
            gate.charge(42, decision, now).await.unwrap();
        }

        assert_eq!(
            gate.authorize(42, now).await.unwrap(),
            Decision::Deny(DenyReason::QuotaExhausted)
        );
        assert_eq!(store.get(42).await.unwrap().unwrap().quota_used_today, 3);
    }
}
