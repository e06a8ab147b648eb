//! Fan-out delivery under the provider's rate ceiling
//!
//! Replays staged content to every non-premium recipient. Unreachable
//! recipients are counted and skipped; a flood-control signal suspends the
//! whole loop for the provider's wait and retries that recipient exactly
//! once; a fixed pacing pause follows every batch regardless of failures.

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod dispatcher_tests;

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broadcast::BroadcastContent;
use crate::errors::SendFailure;

/// Send seam: deliver the staged content to one recipient, and report
/// progress back to the operator. Implemented over the live bot in the
/// handler layer and by a mock in tests.
pub trait BroadcastSender: Send + Sync {
    fn send(
        &self,
        recipient: i64,
        content: &BroadcastContent,
    ) -> impl Future<Output = Result<(), SendFailure>> + Send;

    fn report_progress(&self, done: usize, total: usize) -> impl Future<Output = ()> + Send;
}

/// Completion accounting, always reported to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTotals {
    pub attempted: usize,
    pub delivered: usize,
    pub blocked: usize,
    pub errored: usize,
}

pub struct Dispatcher<S> {
    sender: S,
    batch_size: usize,
    batch_pause: Duration,
    progress_every: usize,
}

impl<S: BroadcastSender> Dispatcher<S> {
    pub fn new(sender: S, batch_size: usize, batch_pause: Duration, progress_every: usize) -> Self {
        Self {
            sender,
            batch_size: batch_size.max(1),
            batch_pause,
            progress_every: progress_every.max(1),
        }
    }

    /// Replay `content` to every recipient, in order.
    pub async fn dispatch(
        &self,
        content: &BroadcastContent,
        recipients: &[i64],
    ) -> DispatchTotals {
        let total = recipients.len();
        let mut totals = DispatchTotals::default();
        info!(recipients = total, "broadcast dispatch started");

        for (i, &recipient) in recipients.iter().enumerate() {
            totals.attempted += 1;

            match self.sender.send(recipient, content).await {
                Ok(()) => totals.delivered += 1,
                Err(SendFailure::Unreachable) => {
                    debug!(recipient, "recipient unreachable, skipping");
                    totals.blocked += 1;
                }
                Err(SendFailure::RetryAfter(wait)) => {
                    warn!(
                        recipient,
                        wait_secs = wait.as_secs(),
                        "flood control, suspending dispatch"
                    );
                    tokio::time::sleep(wait).await;
                    // One retry for the recipient that tripped the limit.
                    match self.sender.send(recipient, content).await {
                        Ok(()) => totals.delivered += 1,
                        Err(SendFailure::Unreachable) => totals.blocked += 1,
                        Err(e) => {
                            warn!(recipient, error = ?e, "retry after flood control failed");
                            totals.errored += 1;
                        }
                    }
                }
                Err(SendFailure::Failed(msg)) => {
                    warn!(recipient, error = %msg, "broadcast send failed");
                    totals.errored += 1;
                }
            }

            let done = i + 1;
            if done % self.progress_every == 0 && done < total {
                self.sender.report_progress(done, total).await;
            }
            // Pacing pause after every batch, independent of failures.
            if done % self.batch_size == 0 && done < total {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        info!(
            attempted = totals.attempted,
            delivered = totals.delivered,
            blocked = totals.blocked,
            errored = totals.errored,
            "broadcast dispatch finished"
        );
        totals
    }
}
