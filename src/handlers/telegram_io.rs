//! Live-bot implementations of the pipeline, notification, and broadcast
//! seams

use std::path::Path;

use anyhow::{Context, Result};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ReplyMarkup,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::broadcast::{BroadcastContent, BroadcastSender};
use crate::errors::{classify_send, SendFailure};
use crate::media::transcode::Transcoder;
use crate::media::{JobIo, JobRequest, JobStage};
use crate::payments::GrantNotifier;

// ── BotJobIo ──────────────────────────────────────────────────────────────────

/// Per-job Telegram I/O: download, transcode, upload, and the single status
/// message that tracks the job for the user.
pub struct BotJobIo {
    bot: Bot,
    transcoder: Transcoder,
    note_length: u32,
    status: Mutex<Option<MessageId>>,
}

impl BotJobIo {
    pub fn new(bot: Bot, transcoder: Transcoder, note_length: u32) -> Self {
        Self {
            bot,
            transcoder,
            note_length,
            status: Mutex::new(None),
        }
    }

    /// Create or edit the single status message for this job.
    async fn set_status(&self, chat_id: ChatId, text: &str) {
        let mut slot = self.status.lock().await;
        match *slot {
            Some(id) => {
                if let Err(e) = self.bot.edit_message_text(chat_id, id, text).await {
                    debug!(error = %e, "status edit failed");
                }
            }
            None => match self.bot.send_message(chat_id, text).await {
                Ok(m) => *slot = Some(m.id),
                Err(e) => debug!(error = %e, "status send failed"),
            },
        }
    }

    /// Replace the progress indicator with a failure report, in place.
    pub async fn fail_status(&self, job: &JobRequest, text: &str) {
        self.set_status(job.chat_id, text).await;
    }

    /// Remove the progress indicator after successful delivery.
    pub async fn clear_status(&self, job: &JobRequest) {
        if let Some(id) = *self.status.lock().await {
            self.bot.delete_message(job.chat_id, id).await.ok();
        }
    }
}

impl JobIo for BotJobIo {
    async fn progress(&self, job: &JobRequest, stage: JobStage) {
        let text = match stage {
            JobStage::Acquiring => "⏳ Downloading…",
            JobStage::Transforming => "⚙️ Cropping…",
            JobStage::Delivering => "⬆️ Uploading…",
        };
        self.set_status(job.chat_id, text).await;
    }

    async fn acquire(&self, job: &JobRequest, dest: &Path) -> Result<()> {
        let file = self
            .bot
            .get_file(job.file_id.clone())
            .await
            .context("getFile failed")?;
        let mut dst = tokio::fs::File::create(dest)
            .await
            .context("failed to create scratch input")?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .context("source download failed")?;
        Ok(())
    }

    async fn transform(&self, input: &Path, output: &Path) -> Result<()> {
        self.transcoder.run(input, output).await
    }

    async fn deliver(&self, job: &JobRequest, artifact: &Path) -> Result<()> {
        let mut req = self
            .bot
            .send_video_note(job.chat_id, InputFile::file(artifact.to_path_buf()));
        req.duration = Some(job.duration_secs);
        req.length = Some(self.note_length);
        req.await.context("sendVideoNote failed")?;

        // Video notes cannot carry a caption; replay the original text with
        // its formatting entities as a follow-up message.
        if !job.caption.is_empty() {
            let mut reply = self.bot.send_message(job.chat_id, job.caption.clone());
            if !job.entities.is_empty() {
                reply.entities = Some(job.entities.clone());
            }
            reply.await.context("caption follow-up failed")?;
        }

        Ok(())
    }
}

// ── TelegramNotifier ──────────────────────────────────────────────────────────

/// Post-grant notification to the beneficiary. Failure is the caller's to
/// log; the grant is durable before this runs.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl GrantNotifier for TelegramNotifier {
    async fn notify_granted(&self, user_id: i64, new_expiry: chrono::NaiveDate) -> Result<()> {
        self.bot
            .send_message(
                ChatId(user_id),
                format!(
                    "✅ Premium is active until {}. Enjoy unlimited round notes!",
                    new_expiry.format("%Y-%m-%d")
                ),
            )
            .await
            .context("grant notification send failed")?;
        Ok(())
    }
}

// ── BotBroadcastSender ────────────────────────────────────────────────────────

/// Replays staged parts to one recipient via copyMessage; the optional
/// call-to-action button rides on the last part.
pub struct BotBroadcastSender {
    bot: Bot,
    operator_chat: ChatId,
}

impl BotBroadcastSender {
    pub fn new(bot: Bot, operator_chat: ChatId) -> Self {
        Self { bot, operator_chat }
    }
}

impl BroadcastSender for BotBroadcastSender {
    async fn send(&self, recipient: i64, content: &BroadcastContent) -> Result<(), SendFailure> {
        let last = content.parts.len().saturating_sub(1);
        for (i, part) in content.parts.iter().enumerate() {
            let mut req = self
                .bot
                .copy_message(ChatId(recipient), part.chat_id, part.message_id);
            if i == last {
                if let Some(url) = &content.button_url {
                    req.reply_markup = Some(ReplyMarkup::InlineKeyboard(
                        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
                            "🔗 Open",
                            url.clone(),
                        )]]),
                    ));
                }
            }
            if let Err(e) = req.await {
                return Err(classify_send(&e));
            }
        }
        Ok(())
    }

    async fn report_progress(&self, done: usize, total: usize) {
        self.bot
            .send_message(
                self.operator_chat,
                format!("📤 Broadcast progress: {}/{}", done, total),
            )
            .await
            .ok();
    }
}
