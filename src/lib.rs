//! # roundnote-bot
//!
//! Telegram bot that converts user-submitted videos into round video notes
//! (400×400 square center-crop, ≤60 s), gated behind a daily free quota and
//! a paid yearly entitlement.
//!
//! Subsystems:
//!
//! - [`entitlement`] — per-user daily-limit and premium-expiry gate,
//!   re-evaluated on every request.
//! - [`payments`] — two payment rails (Crypto Pay poll feed, in-platform
//!   Stars push events) converging on one idempotent reconciliation ledger.
//! - [`media`] — the per-request acquire → transform → deliver pipeline
//!   with guaranteed scratch cleanup.
//! - [`broadcast`] — operator-staged fan-out to non-premium users under the
//!   provider's rate ceiling.

pub mod broadcast;
pub mod config;
pub mod entitlement;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod media;
pub mod payments;
pub mod store;

pub use config::Config;
