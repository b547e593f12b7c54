//! Slash commands: user self-service plus admin ledger operations.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use quill_core::{metrics, QuillError, Usd};
use quill_ledger::Period;

use crate::context::AppContext;
use crate::payments;

/// Handle a slash command. Returns true when the message was a command.
pub async fn handle_command(
    bot: &Bot,
    ctx: &Arc<AppContext>,
    msg: &Message,
    text: &str,
) -> ResponseResult<bool> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(false);
    };
    let user_id = from.id.0 as i64;
    let mut parts = text.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(false);
    };
    let command = command.split('@').next().unwrap_or(command);
    let args: Vec<&str> = parts.collect();

    match command {
        "/start" => {
            let default_model = ctx.config.claude.model.clone();
            let username = from.username.clone();
            let first_name = from.first_name.clone();
            let language = from.language_code.clone();
            let created = ctx.store.with_conn(|conn| {
                quill_store::users::get_or_create(
                    conn,
                    user_id,
                    username.as_deref(),
                    Some(&first_name),
                    language.as_deref(),
                    &default_model,
                )
            });
            match created {
                Ok(user) => {
                    bot.send_message(
                        msg.chat.id,
                        format!(
                            "Hi {}! Send me text, photos, documents or voice messages.\n\
                             Balance: ${}. Top up with /buy <stars>.",
                            from.first_name, user.balance
                        ),
                    )
                    .await?;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "start registration failed");
                    bot.send_message(msg.chat.id, "Registration failed, try again.")
                        .await?;
                }
            }
        }

        "/balance" => {
            match ctx.ledger.get_balance(user_id) {
                Ok(balance) => {
                    bot.send_message(msg.chat.id, format!("Balance: ${balance}"))
                        .await?;
                }
                Err(QuillError::UserNotFound { .. }) => {
                    bot.send_message(msg.chat.id, "Not registered yet — send /start first.")
                        .await?;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "balance lookup failed");
                    bot.send_message(msg.chat.id, "Could not read your balance.")
                        .await?;
                }
            }
        }

        "/history" => {
            let limit = args
                .first()
                .and_then(|a| a.parse::<usize>().ok())
                .unwrap_or(10)
                .min(50);
            match ctx.ledger.balance_history(user_id, limit) {
                Ok(ops) if ops.is_empty() => {
                    bot.send_message(msg.chat.id, "No balance operations yet.")
                        .await?;
                }
                Ok(ops) => {
                    let mut out = String::from("Recent operations:\n");
                    for op in ops {
                        out.push_str(&format!(
                            "{} {} ${} → ${}\n",
                            op.created_at.get(..10).unwrap_or(""),
                            op.operation_type,
                            op.amount,
                            op.balance_after,
                        ));
                    }
                    bot.send_message(msg.chat.id, out).await?;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "history lookup failed");
                    bot.send_message(msg.chat.id, "Could not read your history.")
                        .await?;
                }
            }
        }

        "/usage" => {
            let period = match args.first().copied() {
                Some("today") | None => Period::Today,
                Some("week") => Period::Week,
                Some("month") => Period::Month,
                Some("all") => Period::All,
                Some(other) => {
                    bot.send_message(
                        msg.chat.id,
                        format!("Unknown period {other:?}; use today|week|month|all."),
                    )
                    .await?;
                    return Ok(true);
                }
            };
            match ctx.ledger.total_charged(user_id, period) {
                Ok(total) => {
                    bot.send_message(msg.chat.id, format!("Spent: ${total}")).await?;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "usage lookup failed");
                    bot.send_message(msg.chat.id, "Could not compute usage.").await?;
                }
            }
        }

        "/buy" => {
            let stars = args.first().and_then(|a| a.parse::<i64>().ok()).unwrap_or(0);
            payments::send_invoice(
                bot,
                ctx,
                msg.chat.id,
                payments::invoice_topic(msg),
                user_id,
                stars,
            )
            .await?;
        }

        "/refund" => {
            let Some(charge_id) = args.first() else {
                bot.send_message(msg.chat.id, "Usage: /refund <charge_id>").await?;
                return Ok(true);
            };
            payments::handle_refund(bot, ctx, msg, charge_id).await?;
        }

        "/topup" => {
            if !ctx.is_admin(user_id) {
                bot.send_message(msg.chat.id, "Admins only.").await?;
                return Ok(true);
            }
            let (Some(target), Some(amount_raw)) = (args.first(), args.get(1)) else {
                bot.send_message(msg.chat.id, "Usage: /topup <user_id|@username> <amount> [note]")
                    .await?;
                return Ok(true);
            };
            let Ok(amount) = amount_raw.parse::<Usd>() else {
                bot.send_message(msg.chat.id, format!("Bad amount: {amount_raw}"))
                    .await?;
                return Ok(true);
            };
            let note = if args.len() > 2 {
                Some(args[2..].join(" "))
            } else {
                None
            };

            let (by_id, by_name) = if let Ok(id) = target.parse::<i64>() {
                (Some(id), None)
            } else {
                (None, Some(*target))
            };
            match ctx
                .ledger
                .admin_adjust(user_id, by_id, by_name, amount, note.as_deref())
            {
                Ok((before, after)) => {
                    info!(admin = user_id, target, %amount, "admin topup");
                    bot.send_message(
                        msg.chat.id,
                        format!("Adjusted {target}: ${before} → ${after}"),
                    )
                    .await?;
                }
                Err(e) => {
                    bot.send_message(msg.chat.id, format!("Adjustment failed: {e}"))
                        .await?;
                }
            }
        }

        "/stats" => {
            if !ctx.is_admin(user_id) {
                bot.send_message(msg.chat.id, "Admins only.").await?;
                return Ok(true);
            }
            let queue = ctx.queue.stats().await;
            let limiter = ctx.limiter.stats();
            let (tracked_chats, pending) = ctx.normalization_tracker.stats().await;
            let m = metrics::snapshot();
            let report = format!(
                "Queue: {} threads ({} processing, {} waiting, {} pending)\n\
                 Limiter: {} users, {} active, {} queued, {} processed\n\
                 Normalizing: {} chats / {} messages\n\
                 Metrics: {} received, {} batches, {}/{} tools ok/failed, \
                 {} precheck-rejected, {} cancelled, ${:.4} spent",
                queue.total_threads,
                queue.processing_threads,
                queue.waiting_threads,
                queue.total_pending_messages,
                limiter.total_users_tracked,
                limiter.total_active,
                limiter.total_queued,
                limiter.total_processed,
                tracked_chats,
                pending,
                m.messages_received,
                m.batches_processed,
                m.tool_calls_ok,
                m.tool_calls_failed,
                m.tool_precheck_rejected,
                m.generations_cancelled,
                m.cost_micro_usd as f64 / 1_000_000.0,
            );
            bot.send_message(msg.chat.id, report).await?;
        }

        "/announce" => {
            if !ctx.is_admin(user_id) {
                bot.send_message(msg.chat.id, "Admins only.").await?;
                return Ok(true);
            }
            let text = args.join(" ");
            if text.is_empty() {
                bot.send_message(msg.chat.id, "Usage: /announce <text>").await?;
                return Ok(true);
            }
            let ids = ctx
                .store
                .with_conn(|conn| quill_store::users::all_ids(conn))
                .unwrap_or_default();
            let mut sent = 0usize;
            for id in ids {
                if bot.send_message(ChatId(id), &text).await.is_ok() {
                    sent += 1;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            bot.send_message(msg.chat.id, format!("Announced to {sent} users."))
                .await?;
        }

        _ => return Ok(false),
    }

    Ok(true)
}
