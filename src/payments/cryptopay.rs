//! Crypto Pay HTTP client
//!
//! Thin wrapper over the provider's JSON API. Only the two calls the bot
//! needs: invoice creation for the purchase flow and the paid-invoice feed
//! the poll driver sweeps. Responses arrive in an `{ ok, result }` envelope.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

const TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

#[derive(Clone)]
pub struct CryptoPayClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

/// Provider-side invoice, as returned by both calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoInvoice {
    pub invoice_id: i64,
    pub status: String,
    #[serde(default)]
    pub payload: Option<String>,
    /// Pay URL shown to the buyer
    #[serde(default)]
    pub bot_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct InvoiceList {
    items: Vec<CryptoInvoice>,
}

impl CryptoPayClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Create an invoice carrying our grant payload; returns the pay URL
    /// alongside the provider id.
    pub async fn create_invoice(
        &self,
        asset: &str,
        amount: &str,
        description: &str,
        payload: &str,
    ) -> Result<CryptoInvoice> {
        let url = format!("{}/api/createInvoice", self.base_url);
        let response = self
            .http
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .json(&json!({
                "asset": asset,
                "amount": amount,
                "description": description,
                "payload": payload,
            }))
            .send()
            .await
            .context("createInvoice request failed")?;

        let envelope: Envelope<CryptoInvoice> = response
            .json()
            .await
            .context("createInvoice response was not valid JSON")?;
        unwrap_envelope(envelope, "createInvoice")
    }

    /// The poll feed: every invoice the provider has settled recently.
    pub async fn get_paid_invoices(&self) -> Result<Vec<CryptoInvoice>> {
        let url = format!("{}/api/getInvoices", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .query(&[("status", "paid")])
            .send()
            .await
            .context("getInvoices request failed")?;

        let envelope: Envelope<InvoiceList> = response
            .json()
            .await
            .context("getInvoices response was not valid JSON")?;
        Ok(unwrap_envelope(envelope, "getInvoices")?.items)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>, method: &str) -> Result<T> {
    if !envelope.ok {
        bail!(
            "{} rejected by provider: {}",
            method,
            envelope
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        );
    }
    envelope
        .result
        .with_context(|| format!("{} returned ok without a result", method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_invoice_list_deserializes() {
        let raw = r#"{
            "ok": true,
            "result": {
                "items": [
                    {
                        "invoice_id": 528,
                        "status": "paid",
                        "payload": "premium-sub_42",
                        "bot_invoice_url": "https://t.me/CryptoBot?start=IV528"
                    },
                    {
                        "invoice_id": 529,
                        "status": "paid"
                    }
                ]
            }
        }"#;

        let envelope: Envelope<InvoiceList> = serde_json::from_str(raw).unwrap();
        let list = unwrap_envelope(envelope, "getInvoices").unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].invoice_id, 528);
        assert_eq!(list.items[0].payload.as_deref(), Some("premium-sub_42"));
        assert!(list.items[1].payload.is_none());
    }

    #[test]
    fn provider_error_surfaces_in_message() {
        let raw = r#"{"ok": false, "error": {"code": 401, "name": "UNAUTHORIZED"}}"#;
        let envelope: Envelope<CryptoInvoice> = serde_json::from_str(raw).unwrap();
        let err = unwrap_envelope(envelope, "createInvoice").unwrap_err();
        assert!(err.to_string().contains("UNAUTHORIZED"));
    }

    #[test]
    fn ok_without_result_is_an_error() {
        let raw = r#"{"ok": true}"#;
        let envelope: Envelope<CryptoInvoice> = serde_json::from_str(raw).unwrap();
        assert!(unwrap_envelope(envelope, "createInvoice").is_err());
    }
}
