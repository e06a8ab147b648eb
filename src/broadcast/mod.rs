//! Operator-staged broadcasts
//!
//! Content is collected across a short conversation before dispatch:
//! `CollectingContent → CollectingButton → Confirming`, with an explicit
//! cancel from every state. The state is keyed by operator id in an
//! injected session store, never held as an ambient global.

pub mod dispatcher;

pub use dispatcher::{BroadcastSender, DispatchTotals, Dispatcher};

use std::collections::HashMap;
use std::sync::Arc;

use teloxide::types::{ChatId, MessageId};
use tokio::sync::RwLock;
use url::Url;

/// Maximum message parts in one broadcast (the album window).
pub const MAX_PARTS: usize = 9;

/// One staged message part, replayed verbatim to every recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentPart {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Staged broadcast: 1..=9 parts plus an optional call-to-action link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastContent {
    pub parts: Vec<ContentPart>,
    pub button_url: Option<Url>,
}

/// Why a staging step was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageError {
    /// The album window is full (9 parts).
    PartsFull,
    /// "done" with nothing staged.
    NoParts,
    /// The call-to-action link did not parse as a URL.
    InvalidUrl,
    /// The operation does not apply to the current state.
    WrongState,
}

/// Conversation state for one operator session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastState {
    CollectingContent(BroadcastContent),
    CollectingButton(BroadcastContent),
    Confirming(BroadcastContent),
}

impl BroadcastState {
    pub fn new_session() -> Self {
        BroadcastState::CollectingContent(BroadcastContent::default())
    }

    pub fn content(&self) -> &BroadcastContent {
        match self {
            BroadcastState::CollectingContent(c)
            | BroadcastState::CollectingButton(c)
            | BroadcastState::Confirming(c) => c,
        }
    }

    /// Stage one more part while collecting. Returns the new part count.
    pub fn add_part(&mut self, part: ContentPart) -> Result<usize, StageError> {
        let BroadcastState::CollectingContent(content) = self else {
            return Err(StageError::WrongState);
        };
        if content.parts.len() >= MAX_PARTS {
            return Err(StageError::PartsFull);
        }
        content.parts.push(part);
        Ok(content.parts.len())
    }

    /// The explicit "done" signal bounding the album window.
    pub fn finish_content(&mut self) -> Result<(), StageError> {
        let BroadcastState::CollectingContent(content) = self else {
            return Err(StageError::WrongState);
        };
        if content.parts.is_empty() {
            return Err(StageError::NoParts);
        }
        *self = BroadcastState::CollectingButton(content.clone());
        Ok(())
    }

    /// Attach the call-to-action link and move to the preview.
    pub fn set_button(&mut self, raw: &str) -> Result<(), StageError> {
        let BroadcastState::CollectingButton(content) = self else {
            return Err(StageError::WrongState);
        };
        let url = Url::parse(raw.trim()).map_err(|_| StageError::InvalidUrl)?;
        let mut content = content.clone();
        content.button_url = Some(url);
        *self = BroadcastState::Confirming(content);
        Ok(())
    }

    /// Skip the link and move to the preview.
    pub fn skip_button(&mut self) -> Result<(), StageError> {
        let BroadcastState::CollectingButton(content) = self else {
            return Err(StageError::WrongState);
        };
        *self = BroadcastState::Confirming(content.clone());
        Ok(())
    }
}

/// Keyed session store, scoped to the process lifetime and injected into
/// the handlers.
#[derive(Clone, Default)]
pub struct BroadcastSessions {
    inner: Arc<RwLock<HashMap<i64, BroadcastState>>>,
}

impl BroadcastSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a fresh session, discarding any half-staged one.
    pub async fn start(&self, operator: i64) {
        self.inner
            .write()
            .await
            .insert(operator, BroadcastState::new_session());
    }

    pub async fn get(&self, operator: i64) -> Option<BroadcastState> {
        self.inner.read().await.get(&operator).cloned()
    }

    pub async fn set(&self, operator: i64, state: BroadcastState) {
        self.inner.write().await.insert(operator, state);
    }

    /// Explicit cancel. Returns whether a session existed.
    pub async fn cancel(&self, operator: i64) -> bool {
        self.inner.write().await.remove(&operator).is_some()
    }

    /// Remove and return the session for dispatch.
    pub async fn take(&self, operator: i64) -> Option<BroadcastState> {
        self.inner.write().await.remove(&operator)
    }
}
