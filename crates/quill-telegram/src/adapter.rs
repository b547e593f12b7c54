//! Dispatcher wiring and the long-polling loop.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tracing::info;

use crate::admin;
use crate::context::AppContext;
use crate::handler;
use crate::payments;

pub struct TelegramAdapter {
    ctx: Arc<AppContext>,
}

impl TelegramAdapter {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Drive the long-polling dispatcher. Never returns in normal operation.
    pub async fn run(self) {
        let bot = self.ctx.bot.clone();
        let ctx = self.ctx;

        info!("starting long-polling dispatcher");

        let handler = dptree::entry()
            .branch(
                Update::filter_message().endpoint(
                    |bot: Bot, msg: Message, ctx: Arc<AppContext>| async move {
                        route_message(bot, msg, ctx).await
                    },
                ),
            )
            .branch(
                Update::filter_pre_checkout_query().endpoint(
                    |bot: Bot, query: PreCheckoutQuery, ctx: Arc<AppContext>| async move {
                        payments::handle_pre_checkout(bot, query, ctx).await
                    },
                ),
            );

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![ctx])
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }
}

/// Message-level routing: payments → commands → content pipeline.
async fn route_message(bot: Bot, msg: Message, ctx: Arc<AppContext>) -> ResponseResult<()> {
    if msg.successful_payment().is_some() {
        return payments::handle_successful_payment(bot, msg, ctx).await;
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            let text = text.to_string();
            if admin::handle_command(&bot, &ctx, &msg, &text).await? {
                return Ok(());
            }
            // Unknown command falls through to the LLM as plain text.
        }
    }

    handler::handle_message(bot, msg, ctx).await
}
