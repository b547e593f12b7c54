//! Shared application state threaded through the dispatcher.

use std::sync::Arc;

use teloxide::prelude::*;

use quill_cache::{BytesCache, ExecCache, ToolCallWriter, TtlMap, UserCache};
use quill_core::config::QuillConfig;
use quill_executor::ToolLoopExecutor;
use quill_ledger::{BalanceService, PaymentService};
use quill_pipeline::{
    ConcurrencyLimiter, GenerationTracker, MediaGroupTracker, Normalizer, NormalizationTracker,
    PerThreadQueue, TopicRouter,
};
use quill_store::Store;

pub struct AppContext {
    pub config: QuillConfig,
    pub store: Arc<Store>,
    pub user_cache: Arc<UserCache>,
    pub exec_cache: Arc<ExecCache>,
    pub bytes_cache: Arc<BytesCache>,
    /// Thread rows by (chat, user, topic) key — saves a DB hit per message.
    pub thread_cache: Arc<TtlMap<String, quill_store::types::Thread>>,
    pub writer: ToolCallWriter,
    pub ledger: Arc<BalanceService>,
    pub payments: Arc<PaymentService>,
    pub normalizer: Arc<Normalizer>,
    pub normalization_tracker: Arc<NormalizationTracker>,
    pub media_group_tracker: Arc<MediaGroupTracker>,
    pub generation_tracker: Arc<GenerationTracker>,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub queue: Arc<PerThreadQueue>,
    pub router: Arc<TopicRouter>,
    pub executor: Arc<ToolLoopExecutor>,
    pub bot: Bot,
}

impl AppContext {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.config.telegram.admin_ids.contains(&user_id)
    }

    pub fn tg_parse_mode(&self) -> teloxide::types::ParseMode {
        match self.config.telegram.parse_mode.as_str() {
            "HTML" => teloxide::types::ParseMode::Html,
            _ => teloxide::types::ParseMode::MarkdownV2,
        }
    }
}
