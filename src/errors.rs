//! Telegram-specific error handling
//!
//! Converts teloxide errors into the three outcomes this bot acts on when a
//! send fails: wait out flood control, give up on an unreachable recipient,
//! or log and move on.

use std::time::Duration;

use teloxide::{ApiError, RequestError};

/// Classified send failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// Flood control: suspend sending for this duration, then retry once.
    RetryAfter(Duration),
    /// The recipient can no longer be reached (blocked the bot, deleted the
    /// account, never started a conversation). Permanent for this recipient.
    Unreachable,
    /// Anything else: counted as an error, not retried.
    Failed(String),
}

/// Classify a `RequestError` from a send call.
pub fn classify_send(err: &RequestError) -> SendFailure {
    match err {
        RequestError::RetryAfter(secs) => {
            let wait = Duration::from_secs(secs.duration().as_secs().max(1));
            SendFailure::RetryAfter(wait)
        }
        RequestError::Api(api_err) => classify_api(api_err),
        other => SendFailure::Failed(other.to_string()),
    }
}

fn classify_api(api_err: &ApiError) -> SendFailure {
    match api_err {
        ApiError::BotBlocked
        | ApiError::UserDeactivated
        | ApiError::ChatNotFound
        | ApiError::UserNotFound
        | ApiError::GroupDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots => SendFailure::Unreachable,
        other => SendFailure::Failed(other.to_string()),
    }
}
