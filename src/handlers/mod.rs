//! Message handlers for Telegram updates
//!
//! One endpoint per update shape, selected once by the dispatcher tree in
//! `main`. Every inbound interaction upserts the user record before any
//! other work.

pub mod telegram_io;

pub use telegram_io::{BotBroadcastSender, BotJobIo, TelegramNotifier};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, LabeledPrice, Message,
    ReplyMarkup, User,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::broadcast::{
    BroadcastContent, BroadcastSessions, BroadcastState, ContentPart, Dispatcher, StageError,
};
use crate::config::Config;
use crate::entitlement::entitled;
use crate::health::AppState;
use crate::media::transcode::Transcoder;
use crate::media::{JobOutcome, JobRequest, JobStage, Pipeline, RejectReason};
use crate::payments::{grant_payload, CryptoPayClient, Reconciler, SettledInvoice};
use crate::store::{PaymentRail, UserStore};

/// Everything the handlers need, injected through the dispatcher tree.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub users: UserStore,
    pub pipeline: Pipeline,
    pub transcoder: Transcoder,
    pub reconciler: Reconciler<TelegramNotifier>,
    pub cryptopay: CryptoPayClient,
    pub sessions: BroadcastSessions,
}

fn is_admin(ctx: &AppContext, user_id: i64) -> bool {
    ctx.config.telegram.admin_user_id != 0 && user_id == ctx.config.telegram.admin_user_id
}

/// Ensure the sender exists in the store; called on every interaction.
async fn register_user(ctx: &AppContext, user: &User) -> Option<i64> {
    let user_id = user.id.0 as i64;
    match ctx
        .users
        .get_or_create(user_id, user.username.as_deref(), Some(&user.first_name))
        .await
    {
        Ok(_) => Some(user_id),
        Err(e) => {
            error!(user_id, error = %e, "failed to register user");
            None
        }
    }
}

// ── Text and commands ─────────────────────────────────────────────────────────

/// Handle text messages
pub async fn handle_text_message(
    bot: Bot,
    msg: Message,
    ctx: AppContext,
    _health: AppState,
) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let Some(user_id) = register_user(&ctx, &user).await else {
        return Ok(());
    };

    let text = msg.text().unwrap_or_default().to_string();
    if text.starts_with('/') {
        return handle_command(bot, msg, ctx, user_id, &text).await;
    }

    // Plain text from the operator while a broadcast session is open is
    // either a content part or the call-to-action link.
    if is_admin(&ctx, user_id) {
        if let Some(state) = ctx.sessions.get(user_id).await {
            return handle_staging_text(bot, msg, ctx, state, user_id, &text).await;
        }
    }

    Ok(())
}

/// Handle commands
async fn handle_command(
    bot: Bot,
    msg: Message,
    ctx: AppContext,
    user_id: i64,
    text: &str,
) -> ResponseResult<()> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(());
    }

    // "/start@SomeBot" is still "/start"
    let command = parts[0]
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    info!(user_id, command = %command, "received command");

    match command.as_str() {
        "start" => {
            let name = msg
                .from
                .as_ref()
                .map(|u| u.first_name.clone())
                .unwrap_or_else(|| "there".to_string());
            bot.send_message(
                msg.chat.id,
                format!(
                    "✨ Hello, {}!\n\n\
                     I convert your videos into round notes. Just send me a \
                     video file and I'll do the rest.\n\
                     The result is only visible on the mobile version of Telegram.\n\n\
                     Free plan: {} videos per day. /premium removes the limit.",
                    name, ctx.config.limits.daily_free_quota
                ),
            )
            .await?;
        }
        "premium" => {
            let mut req = bot.send_message(
                msg.chat.id,
                "⭐ Premium: unlimited round notes for one year.\n\nChoose how to pay:",
            );
            req.reply_markup = Some(ReplyMarkup::InlineKeyboard(premium_keyboard()));
            req.await?;
        }
        "status" => {
            let line = match ctx.users.get(user_id).await {
                Ok(Some(record)) => {
                    let today = Utc::now().date_naive();
                    match record.premium_expiry {
                        Some(expiry) if entitled(&record, today) => {
                            format!("⭐ Premium is active until {}.", expiry)
                        }
                        _ => {
                            // Mirror the gate's lazy reset for display
                            let used = if record.last_quota_date == Some(today) {
                                record.quota_used_today
                            } else {
                                0
                            };
                            format!(
                                "You used {} of {} free conversions today.",
                                used, ctx.config.limits.daily_free_quota
                            )
                        }
                    }
                }
                _ => "No record yet — send me a video!".to_string(),
            };
            bot.send_message(msg.chat.id, line).await?;
        }
        "broadcast" if is_admin(&ctx, user_id) => {
            ctx.sessions.start(user_id).await;
            bot.send_message(
                msg.chat.id,
                "📣 Broadcast staging started. Send up to 9 messages, then /done. \
                 /cancel aborts at any point.",
            )
            .await?;
        }
        "done" if is_admin(&ctx, user_id) => {
            let Some(mut state) = ctx.sessions.get(user_id).await else {
                return Ok(());
            };
            match state.finish_content() {
                Ok(()) => {
                    ctx.sessions.set(user_id, state).await;
                    bot.send_message(
                        msg.chat.id,
                        "Now send a link for the call-to-action button, or /skip.",
                    )
                    .await?;
                }
                Err(StageError::NoParts) => {
                    bot.send_message(msg.chat.id, "Nothing staged yet — send a message first.")
                        .await?;
                }
                Err(_) => {}
            }
        }
        "skip" if is_admin(&ctx, user_id) => {
            let Some(mut state) = ctx.sessions.get(user_id).await else {
                return Ok(());
            };
            if state.skip_button().is_ok() {
                let content = state.content().clone();
                ctx.sessions.set(user_id, state).await;
                send_preview(&bot, msg.chat.id, &content).await?;
            }
        }
        "cancel" if is_admin(&ctx, user_id) => {
            if ctx.sessions.cancel(user_id).await {
                bot.send_message(msg.chat.id, "Broadcast cancelled.").await?;
            }
        }
        _ => {
            debug!(command = %command, "ignoring unknown command");
        }
    }

    Ok(())
}

/// Operator text while a broadcast session is open.
async fn handle_staging_text(
    bot: Bot,
    msg: Message,
    ctx: AppContext,
    mut state: BroadcastState,
    user_id: i64,
    text: &str,
) -> ResponseResult<()> {
    if matches!(state, BroadcastState::CollectingContent(_)) {
        return stage_part(&bot, &msg, &ctx, user_id, state).await;
    }
    if matches!(state, BroadcastState::Confirming(_)) {
        bot.send_message(msg.chat.id, "Use the buttons to confirm or cancel.")
            .await?;
        return Ok(());
    }

    // CollectingButton: the text is the call-to-action link.
    match state.set_button(text) {
        Ok(()) => {
            let content = state.content().clone();
            ctx.sessions.set(user_id, state).await;
            send_preview(&bot, msg.chat.id, &content).await?;
        }
        Err(StageError::InvalidUrl) => {
            bot.send_message(
                msg.chat.id,
                "That does not look like a link. Send a full URL, or /skip.",
            )
            .await?;
        }
        Err(_) => {}
    }
    Ok(())
}

// ── Video messages ────────────────────────────────────────────────────────────

/// Handle video messages — the conversion entry point
pub async fn handle_video_message(
    bot: Bot,
    msg: Message,
    ctx: AppContext,
    health: AppState,
) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let Some(user_id) = register_user(&ctx, &user).await else {
        return Ok(());
    };

    // The operator's staging window captures videos too.
    if is_admin(&ctx, user_id) {
        if let Some(state) = ctx.sessions.get(user_id).await {
            if matches!(state, BroadcastState::CollectingContent(_)) {
                stage_part(&bot, &msg, &ctx, user_id, state).await?;
                return Ok(());
            }
        }
    }

    if !msg.chat.is_private() {
        return Ok(());
    }

    let video = msg.video().unwrap();
    let job = JobRequest {
        request_id: msg.id.0 as i64,
        chat_id: msg.chat.id,
        user_id,
        file_id: video.file.id.clone(),
        duration_secs: video.duration.seconds(),
        caption: msg.caption().unwrap_or_default().to_string(),
        entities: msg.caption_entities().map(|e| e.to_vec()).unwrap_or_default(),
    };

    let io = BotJobIo::new(
        bot.clone(),
        ctx.transcoder.clone(),
        ctx.config.media.note_length,
    );

    let outcome = match ctx.pipeline.handle(&io, &job, Utc::now()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(user_id, error = %e, "pipeline error");
            health.increment_errors().await;
            io.fail_status(&job, "❌ Something went wrong. Please try again.")
                .await;
            return Ok(());
        }
    };

    match outcome {
        JobOutcome::Delivered { charged } => {
            health.increment_jobs_delivered().await;
            io.clear_status(&job).await;
            // Premium users know the drill; free users get the reminder.
            if charged {
                bot.send_message(
                    msg.chat.id,
                    "Do not forget that the result is only visible on the mobile \
                     version of Telegram!",
                )
                .await?;
            }
        }
        JobOutcome::Rejected(RejectReason::TooLong { limit_secs }) => {
            health.increment_jobs_rejected().await;
            bot.send_message(
                msg.chat.id,
                format!(
                    "❌ Video is too long! Maximum length for round notes is {} seconds.",
                    limit_secs
                ),
            )
            .await?;
        }
        JobOutcome::Rejected(RejectReason::QuotaExhausted) => {
            health.increment_jobs_rejected().await;
            let mut req = bot.send_message(
                msg.chat.id,
                "🚫 Daily limit reached! Premium removes the limit.",
            );
            req.reply_markup = Some(ReplyMarkup::InlineKeyboard(premium_keyboard()));
            req.await?;
        }
        JobOutcome::Failed(failure) => {
            health.increment_jobs_failed().await;
            let text = match failure.stage {
                JobStage::Acquiring => "❌ Error: could not download the video.",
                JobStage::Transforming => "❌ Error: processing failed.",
                JobStage::Delivering => "❌ Error: could not send the result.",
            };
            io.fail_status(&job, text).await;
        }
    }

    Ok(())
}

/// Fallback for any other message shape: only meaningful while the
/// operator is staging a broadcast.
pub async fn handle_other_message(
    bot: Bot,
    msg: Message,
    ctx: AppContext,
    _health: AppState,
) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let Some(user_id) = register_user(&ctx, &user).await else {
        return Ok(());
    };

    if is_admin(&ctx, user_id) {
        if let Some(state) = ctx.sessions.get(user_id).await {
            if matches!(state, BroadcastState::CollectingContent(_)) {
                stage_part(&bot, &msg, &ctx, user_id, state).await?;
            }
        }
    }

    Ok(())
}

async fn stage_part(
    bot: &Bot,
    msg: &Message,
    ctx: &AppContext,
    user_id: i64,
    mut state: BroadcastState,
) -> ResponseResult<()> {
    let part = ContentPart {
        chat_id: msg.chat.id,
        message_id: msg.id,
    };
    match state.add_part(part) {
        Ok(count) => {
            ctx.sessions.set(user_id, state).await;
            bot.send_message(
                msg.chat.id,
                format!("Added part {}/{}. Send more or /done.", count, crate::broadcast::MAX_PARTS),
            )
            .await?;
        }
        Err(StageError::PartsFull) => {
            bot.send_message(
                msg.chat.id,
                "The album window is full. Send /done to continue.",
            )
            .await?;
        }
        Err(_) => {}
    }
    Ok(())
}

async fn send_preview(bot: &Bot, chat_id: ChatId, content: &BroadcastContent) -> ResponseResult<()> {
    // Replay the staged parts back to the operator, exactly as recipients
    // will see them.
    let last = content.parts.len().saturating_sub(1);
    for (i, part) in content.parts.iter().enumerate() {
        let mut req = bot.copy_message(chat_id, part.chat_id, part.message_id);
        if i == last {
            if let Some(url) = &content.button_url {
                req.reply_markup = Some(ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(
                    vec![vec![InlineKeyboardButton::url("🔗 Open", url.clone())]],
                )));
            }
        }
        req.await.ok();
    }

    let summary = format!(
        "Preview above: {} message(s){}. Send to all non-premium users?",
        content.parts.len(),
        if content.button_url.is_some() {
            ", with button"
        } else {
            ""
        }
    );
    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Send", "broadcast:confirm"),
        InlineKeyboardButton::callback("❌ Cancel", "broadcast:cancel"),
    ]]);
    let mut req = bot.send_message(chat_id, summary);
    req.reply_markup = Some(ReplyMarkup::InlineKeyboard(keyboard));
    req.await?;
    Ok(())
}

fn premium_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "⭐ Pay with Telegram Stars",
            "premium:stars",
        )],
        vec![InlineKeyboardButton::callback(
            "💎 Pay with crypto",
            "premium:crypto",
        )],
    ])
}

// ── Callback queries ──────────────────────────────────────────────────────────

/// Handle callback queries (button clicks)
pub async fn handle_callback_query(
    bot: Bot,
    query: CallbackQuery,
    ctx: AppContext,
    health: AppState,
) -> ResponseResult<()> {
    bot.answer_callback_query(query.id.clone()).await?;

    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let user_id = query.from.id.0 as i64;
    let chat_id = ChatId(user_id);

    debug!(user_id, data, "callback query");

    match data {
        "premium:stars" => {
            let prices = vec![LabeledPrice {
                label: "Premium (1 year)".to_string(),
                amount: ctx.config.payments.price_stars,
            }];
            // Stars invoices carry no provider token; settlement arrives
            // back on this bot as a successful-payment message.
            bot.send_invoice(
                chat_id,
                "Premium (1 year)".to_string(),
                "Unlimited round-note conversions for one year.".to_string(),
                grant_payload(user_id),
                "".to_string(),
                "XTR".to_string(),
                prices,
            )
            .await?;
        }
        "premium:crypto" => {
            let payments = &ctx.config.payments;
            match ctx
                .cryptopay
                .create_invoice(
                    &payments.price_asset,
                    &payments.price_amount,
                    "Premium (1 year)",
                    &grant_payload(user_id),
                )
                .await
            {
                Ok(invoice) => {
                    let pay_url = invoice
                        .bot_invoice_url
                        .as_deref()
                        .and_then(|u| Url::parse(u).ok());
                    match pay_url {
                        Some(url) => {
                            let keyboard = InlineKeyboardMarkup::new(vec![vec![
                                InlineKeyboardButton::url("💎 Pay invoice", url),
                            ]]);
                            let mut req = bot.send_message(
                                chat_id,
                                format!(
                                    "Invoice for {} {} created. Premium activates \
                                     automatically after payment.",
                                    payments.price_amount, payments.price_asset
                                ),
                            );
                            req.reply_markup = Some(ReplyMarkup::InlineKeyboard(keyboard));
                            req.await?;
                        }
                        None => {
                            warn!(invoice_id = invoice.invoice_id, "invoice has no pay url");
                            bot.send_message(chat_id, "⚠️ Payment service returned no pay link. Try again later.")
                                .await?;
                        }
                    }
                }
                Err(e) => {
                    warn!(user_id, error = %e, "createInvoice failed");
                    health.increment_errors().await;
                    bot.send_message(chat_id, "⚠️ Payment service is unavailable. Try again later.")
                        .await?;
                }
            }
        }
        "broadcast:confirm" if is_admin(&ctx, user_id) => {
            match ctx.sessions.take(user_id).await {
                Some(BroadcastState::Confirming(content)) => {
                    run_broadcast(bot, ctx, health, chat_id, content).await;
                }
                // A stray confirm click outside the preview state must not
                // eat a half-staged session.
                Some(other) => ctx.sessions.set(user_id, other).await,
                None => {}
            }
        }
        "broadcast:cancel" if is_admin(&ctx, user_id) => {
            ctx.sessions.cancel(user_id).await;
            bot.send_message(chat_id, "Broadcast cancelled.").await?;
        }
        other => {
            debug!(data = other, "ignoring unknown callback data");
        }
    }

    Ok(())
}

/// Spawn the dispatch loop; it can run for minutes under pacing pauses and
/// must not block the update dispatcher.
async fn run_broadcast(
    bot: Bot,
    ctx: AppContext,
    health: AppState,
    operator_chat: ChatId,
    content: BroadcastContent,
) {
    tokio::spawn(async move {
        let recipients = match ctx.users.non_premium_ids(Utc::now().date_naive()).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to load broadcast recipients");
                bot.send_message(operator_chat, "⚠️ Could not load the recipient list.")
                    .await
                    .ok();
                return;
            }
        };

        let cfg = &ctx.config.broadcast;
        let dispatcher = Dispatcher::new(
            BotBroadcastSender::new(bot.clone(), operator_chat),
            cfg.batch_size,
            Duration::from_millis(cfg.batch_pause_ms),
            cfg.progress_every,
        );

        let totals = dispatcher.dispatch(&content, &recipients).await;
        health.increment_broadcasts_dispatched().await;

        bot.send_message(
            operator_chat,
            format!(
                "📣 Broadcast finished.\nAttempted: {}\nDelivered: {}\nUnreachable: {}\nErrored: {}",
                totals.attempted, totals.delivered, totals.blocked, totals.errored
            ),
        )
        .await
        .ok();
    });
}

// ── Payments (push driver) ────────────────────────────────────────────────────

/// Handle pre-checkout queries.
///
/// The acknowledgement is a protocol step the provider requires before the
/// charge is final; it is answered synchronously and unconditionally, and
/// is distinct from reconciliation.
pub async fn handle_pre_checkout_query(
    bot: Bot,
    query: teloxide::types::PreCheckoutQuery,
    _ctx: AppContext,
    _health: AppState,
) -> ResponseResult<()> {
    debug!(
        user_id = query.from.id.0,
        amount = query.total_amount,
        currency = ?query.currency,
        "pre-checkout query"
    );

    bot.answer_pre_checkout_query(query.id.clone(), true).await?;
    Ok(())
}

/// Handle successful payments — the push driver's settlement event.
pub async fn handle_successful_payment(
    _bot: Bot,
    msg: Message,
    ctx: AppContext,
    health: AppState,
) -> ResponseResult<()> {
    let Some(payment) = msg.successful_payment() else {
        return Ok(());
    };

    info!(
        chat_id = msg.chat.id.0,
        amount = payment.total_amount,
        currency = ?payment.currency,
        "successful payment received"
    );

    let settled = SettledInvoice {
        external_id: payment.telegram_payment_charge_id.clone(),
        payload: payment.invoice_payload.clone(),
        rail: PaymentRail::Stars,
    };

    match ctx.reconciler.reconcile(&settled, Utc::now()).await {
        Ok(crate::payments::ReconcileOutcome::Granted { user_id, .. }) => {
            info!(user_id, "push-driver grant applied");
            health.increment_grants_applied().await;
        }
        Ok(outcome) => {
            debug!(?outcome, "push-driver settlement was not a fresh grant");
        }
        Err(e) => {
            error!(error = %e, "push-driver reconcile failed");
            health.increment_errors().await;
        }
    }

    Ok(())
}
