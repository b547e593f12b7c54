//! Stars payment surface: invoice, pre-checkout, successful payment, refund.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{LabeledPrice, ThreadId};
use tracing::{error, info};

use quill_core::QuillError;

use crate::context::AppContext;

const INVOICE_TITLE: &str = "Balance top-up";

/// `/buy <stars>` — send an invoice in XTR with an empty provider token.
pub async fn send_invoice(
    bot: &Bot,
    ctx: &Arc<AppContext>,
    chat_id: ChatId,
    topic_id: Option<ThreadId>,
    user_id: i64,
    stars_amount: i64,
) -> ResponseResult<()> {
    if stars_amount <= 0 {
        bot.send_message(chat_id, "Usage: /buy <stars>, e.g. /buy 100")
            .await?;
        return Ok(());
    }

    let breakdown = match ctx.payments.calculate_usd_amount(stars_amount, None) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "invoice calculation failed");
            bot.send_message(chat_id, "Payment configuration error.").await?;
            return Ok(());
        }
    };

    let payload = ctx.payments.invoice_payload(user_id, stars_amount);
    let description = format!(
        "Credit ${} to your balance ({stars_amount} ⭐)",
        breakdown.credited_usd
    );

    let mut request = bot
        .send_invoice(
            chat_id,
            INVOICE_TITLE,
            &description,
            &payload,
            "XTR",
            vec![LabeledPrice {
                label: "Balance".to_string(),
                amount: stars_amount as u32,
            }],
        )
        .provider_token("");
    if let Some(topic) = topic_id {
        request = request.message_thread_id(topic);
    }
    request.await?;

    info!(
        user_id,
        stars = stars_amount,
        credited = %breakdown.credited_usd,
        payload,
        "invoice sent"
    );
    Ok(())
}

/// Telegram asks for confirmation before charging Stars.
pub async fn handle_pre_checkout(
    bot: Bot,
    query: PreCheckoutQuery,
    _ctx: Arc<AppContext>,
) -> ResponseResult<()> {
    // Amount and payload were generated by us; accept.
    bot.answer_pre_checkout_query(query.id, true).await?;
    Ok(())
}

/// SuccessfulPayment update: credit exactly once.
pub async fn handle_successful_payment(
    bot: Bot,
    msg: Message,
    ctx: Arc<AppContext>,
) -> ResponseResult<()> {
    let Some(payment) = msg.successful_payment() else {
        return Ok(());
    };
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;

    let result = ctx.payments.process_successful_payment(
        user_id,
        &payment.telegram_payment_charge_id.0,
        payment.total_amount as i64,
        &payment.invoice_payload,
        None,
    );

    match result {
        Ok(p) => {
            let balance = ctx.ledger.get_balance(user_id).ok();
            let balance_line = balance
                .map(|b| format!("\nBalance: ${b}"))
                .unwrap_or_default();
            bot.send_message(
                msg.chat.id,
                format!("Payment received: ${} credited.{balance_line}", p.credited_usd),
            )
            .await?;
        }
        Err(QuillError::DuplicatePayment { charge_id }) => {
            // Telegram redelivers updates; the credit already happened.
            info!(user_id, charge_id, "duplicate successful_payment ignored");
        }
        Err(e) => {
            error!(user_id, error = %e, "payment processing failed");
            bot.send_message(
                msg.chat.id,
                "Payment could not be processed. Support has been notified.",
            )
            .await?;
        }
    }
    Ok(())
}

/// `/refund <charge_id>` — validate, deduct, then refund platform-side.
pub async fn handle_refund(
    bot: &Bot,
    ctx: &Arc<AppContext>,
    msg: &Message,
    charge_id: &str,
) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;

    match ctx.payments.process_refund(user_id, charge_id) {
        Ok(payment) => {
            // Ledger side done; perform the platform-side refund.
            let refunded = bot
                .refund_star_payment(from.id, teloxide::types::TelegramTransactionId(charge_id.to_string()))
                .await;
            if let Err(e) = refunded {
                error!(user_id, charge_id, error = %e, "platform refund call failed");
            }
            bot.send_message(
                msg.chat.id,
                format!("Refunded ${} ({} ⭐).", payment.credited_usd, payment.stars_amount),
            )
            .await?;
        }
        Err(QuillError::RefundWindowExpired { days }) => {
            bot.send_message(
                msg.chat.id,
                format!("Refunds are only possible within {days} days of payment."),
            )
            .await?;
        }
        Err(QuillError::InsufficientBalance { balance_usd }) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Your balance (${balance_usd}) is below the refundable amount — \
                     the credit has already been spent."
                ),
            )
            .await?;
        }
        Err(QuillError::PaymentNotFound { .. }) => {
            bot.send_message(msg.chat.id, "No such payment on your account.")
                .await?;
        }
        Err(e) => {
            error!(user_id, charge_id, error = %e, "refund failed");
            bot.send_message(msg.chat.id, "Refund could not be processed.")
                .await?;
        }
    }
    Ok(())
}

/// Keep invoice replies inside the topic the user asked from.
pub fn invoice_topic(msg: &Message) -> Option<ThreadId> {
    msg.thread_id
}
