//! Job orchestration: Gated → Acquiring → Transforming → Delivering →
//! Charged → Cleaned
//!
//! The quota gate runs before any resource is acquired, the duration
//! ceiling is checked before the expensive download, quota is charged only
//! after delivery succeeded, and scratch cleanup runs on every exit path.
//! Telegram I/O sits behind the [`JobIo`] seam so the failure branches are
//! unit-testable.

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use teloxide::types::{ChatId, MessageEntity};
use tracing::{info, warn};

use crate::entitlement::{Decision, DenyReason, Gate};
use crate::media::scratch::ScratchPair;

/// One qualifying inbound clip.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Message id of the submission; part of the scratch collision key.
    pub request_id: i64,
    pub chat_id: ChatId,
    pub user_id: i64,
    /// Platform file reference of the source video.
    pub file_id: String,
    pub duration_secs: u32,
    /// Original caption, replayed with its formatting entities after the
    /// note is delivered.
    pub caption: String,
    pub entities: Vec<MessageEntity>,
}

/// Pipeline stage, reported to the user as a status-message edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Acquiring,
    Transforming,
    Delivering,
}

/// Platform I/O seam: stage the source, convert it, deliver the result.
pub trait JobIo: Send + Sync {
    /// Best-effort progress signal; never fails the job.
    fn progress(&self, job: &JobRequest, stage: JobStage) -> impl Future<Output = ()> + Send;

    /// Stage the source bytes into `dest`.
    fn acquire(&self, job: &JobRequest, dest: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Convert the staged input into the round-note artifact at `output`.
    fn transform(&self, input: &Path, output: &Path)
        -> impl Future<Output = Result<()>> + Send;

    /// Upload and send the artifact as a round video note.
    fn deliver(&self, job: &JobRequest, artifact: &Path)
        -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    QuotaExhausted,
    TooLong { limit_secs: u32 },
}

/// A pipeline failure after the gate: the stage it died in plus a message
/// for the log. The user is never billed for these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub stage: JobStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Note delivered; `charged` is true when one quota unit was consumed.
    Delivered { charged: bool },
    /// Rejected before any resource was acquired.
    Rejected(RejectReason),
    /// Died mid-pipeline; scratch is cleaned, quota untouched.
    Failed(JobFailure),
}

#[derive(Clone)]
pub struct Pipeline {
    gate: Gate,
    scratch_dir: PathBuf,
    max_clip_secs: u32,
}

impl Pipeline {
    pub fn new(gate: Gate, scratch_dir: PathBuf, max_clip_secs: u32) -> Self {
        Self {
            gate,
            scratch_dir,
            max_clip_secs,
        }
    }

    /// Drive one job to a terminal state. Exactly one invocation per
    /// qualifying inbound event.
    pub async fn handle<I: JobIo>(
        &self,
        io: &I,
        job: &JobRequest,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        // 1. Gate. On Deny nothing has been acquired yet.
        let decision = self.gate.authorize(job.user_id, now).await?;
        if let Decision::Deny(DenyReason::QuotaExhausted) = decision {
            return Ok(JobOutcome::Rejected(RejectReason::QuotaExhausted));
        }

        // 2. Cheap validation before any byte is downloaded.
        if job.duration_secs > self.max_clip_secs {
            return Ok(JobOutcome::Rejected(RejectReason::TooLong {
                limit_secs: self.max_clip_secs,
            }));
        }

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .context("failed to create scratch directory")?;
        let scratch = ScratchPair::new(&self.scratch_dir, job.request_id);

        // 3–5. Stages, then cleanup regardless of where they stopped.
        let staged = self.run_stages(io, job, &scratch).await;
        scratch.cleanup().await;

        match staged {
            Ok(()) => {
                // 6. Charge only now that delivery is done.
                self.gate.charge(job.user_id, decision, now).await?;
                let charged = matches!(decision, Decision::Allow { counted: true });
                info!(
                    user_id = job.user_id,
                    request_id = job.request_id,
                    charged,
                    "round note delivered"
                );
                Ok(JobOutcome::Delivered { charged })
            }
            Err(failure) => {
                warn!(
                    user_id = job.user_id,
                    request_id = job.request_id,
                    stage = ?failure.stage,
                    error = %failure.message,
                    "job failed"
                );
                Ok(JobOutcome::Failed(failure))
            }
        }
    }

    async fn run_stages<I: JobIo>(
        &self,
        io: &I,
        job: &JobRequest,
        scratch: &ScratchPair,
    ) -> std::result::Result<(), JobFailure> {
        let fail = |stage: JobStage| move |e: anyhow::Error| JobFailure {
            stage,
            message: e.to_string(),
        };

        io.progress(job, JobStage::Acquiring).await;
        io.acquire(job, &scratch.input)
            .await
            .map_err(fail(JobStage::Acquiring))?;

        io.progress(job, JobStage::Transforming).await;
        io.transform(&scratch.input, &scratch.output)
            .await
            .map_err(fail(JobStage::Transforming))?;

        io.progress(job, JobStage::Delivering).await;
        io.deliver(job, &scratch.output)
            .await
            .map_err(fail(JobStage::Delivering))?;

        Ok(())
    }
}
