//! Payment rails and the reconciliation service
//!
//! Two rails sell the same thing: a Crypto Pay invoice (settled invoices
//! arrive on a poll feed) and an in-platform Stars invoice (settlement is
//! pushed as a successful-payment message). Both carry the same opaque
//! payload and converge on [`Reconciler::reconcile`]; the rail is recorded
//! as metadata, never branched on.

pub mod cryptopay;
pub mod poller;
pub mod reconcile;

pub use cryptopay::CryptoPayClient;
pub use poller::InvoicePoller;
pub use reconcile::{GrantNotifier, ReconcileOutcome, Reconciler, SettledInvoice};

/// Wire prefix of the grant payload carried by every invoice.
pub const PAYLOAD_PREFIX: &str = "premium-sub_";

/// Build the opaque invoice payload for a beneficiary.
pub fn grant_payload(user_id: i64) -> String {
    format!("{}{}", PAYLOAD_PREFIX, user_id)
}

/// Parse a grant payload back into the beneficiary id.
pub fn parse_grant_payload(payload: &str) -> Option<i64> {
    payload.strip_prefix(PAYLOAD_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        assert_eq!(parse_grant_payload(&grant_payload(42)), Some(42));
    }

    #[test]
    fn malformed_payloads_parse_to_none() {
        assert_eq!(parse_grant_payload(""), None);
        assert_eq!(parse_grant_payload("premium-sub_"), None);
        assert_eq!(parse_grant_payload("premium-sub_abc"), None);
        assert_eq!(parse_grant_payload("other_42"), None);
    }

    #[test]
    fn negative_ids_are_preserved() {
        // Channel/group ids are negative; a payload built from one must
        // survive the roundtrip even though no grant should target them.
        assert_eq!(parse_grant_payload("premium-sub_-100"), Some(-100));
    }
}
