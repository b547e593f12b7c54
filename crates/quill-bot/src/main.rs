//! Binary entry point: config, wiring, long-polling loop.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use teloxide::prelude::*;
use tracing::{info, warn};

use quill_cache::{BytesCache, ExecCache, ToolCallWriter, UserCache};
use quill_claude::{AnthropicClient, FilesClient, SpeechClient};
use quill_core::config::QuillConfig;
use quill_executor::executor::{ExecutorConfig, ExecutorDeps};
use quill_executor::tools::analyze::{AnalyzeImage, AnalyzePdf};
use quill_executor::tools::deliver_file::DeliverFile;
use quill_executor::tools::execute_python::{ExecClient, ExecutePython};
use quill_executor::tools::generate_image::{GenerateImage, ImageGenClient};
use quill_executor::tools::preview_file::PreviewFile;
use quill_executor::tools::registry::ToolRegistry;
use quill_executor::tools::render_latex::{LatexClient, RenderLatex};
use quill_executor::tools::transcribe::TranscribeAudio;
use quill_executor::tools::web::{WebFetch, WebSearch};
use quill_executor::tools::Tool;
use quill_executor::ToolLoopExecutor;
use quill_files::FileManager;
use quill_ledger::{balance::usd_from_f64, BalanceService, PaymentService};
use quill_pipeline::{
    ConcurrencyLimiter, GenerationTracker, MediaGroupTracker, Normalizer, NormalizationTracker,
    PerThreadQueue, TopicRouter,
};
use quill_store::Store;
use quill_telegram::handler::TelegramBatchProcessor;
use quill_telegram::media::TelegramFiles;
use quill_telegram::{AppContext, TelegramAdapter};

const GLOBAL_SYSTEM_PROMPT: &str = include_str!("system_prompt.md");

#[derive(Parser)]
#[command(name = "quill-bot", about = "Telegram ⇄ Claude chat bot with billed usage")]
struct Args {
    /// Config file path (default: QUILL_CONFIG env or ./quill.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quill=info,quill_bot=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = QuillConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        QuillConfig::default()
    });

    if config.telegram.bot_token.is_empty() {
        anyhow::bail!("telegram.bot_token is not configured");
    }
    if config.claude.api_key.is_empty() {
        anyhow::bail!("claude.api_key is not configured");
    }

    let store = Arc::new(Store::open(&config.database.path)?);
    info!(path = %config.database.path, "database ready");

    // Caches.
    let user_cache = Arc::new(UserCache::new());
    let exec_cache = Arc::new(ExecCache::new(
        Duration::from_secs(config.files.exec_file_ttl_secs),
        config.files.exec_file_max_size,
    ));
    let bytes_cache = Arc::new(BytesCache::new(
        Duration::from_secs(config.files.bytes_cache_ttl_secs),
        config.files.bytes_cache_max_entries,
    ));
    let thread_cache = Arc::new(quill_cache::TtlMap::new(4096));
    let writer = ToolCallWriter::spawn(Arc::clone(&store));

    // External clients.
    let retry = config.retry.policy();
    let client = AnthropicClient::new(
        config.claude.api_key.clone(),
        Some(config.claude.base_url.clone()),
        retry,
    );
    let files_api = FilesClient::from_client(client.clone());
    let speech = SpeechClient::new(
        config.services.speech_base_url.clone(),
        config.claude.api_key.clone(),
        retry,
    );

    // Money.
    let ledger = Arc::new(BalanceService::new(
        Arc::clone(&store),
        Arc::clone(&user_cache),
        usd_from_f64(config.billing.minimum_balance_for_request),
    ));
    let payments = Arc::new(PaymentService::new(
        Arc::clone(&store),
        Arc::clone(&user_cache),
        config.billing.clone(),
    ));

    // Platform + files.
    let bot = Bot::new(&config.telegram.bot_token);
    let platform_files = Arc::new(TelegramFiles::new(bot.clone()));
    let file_manager = Arc::new(FileManager::new(
        Arc::clone(&store),
        Arc::clone(&exec_cache),
        Arc::clone(&bytes_cache),
        files_api.clone(),
        platform_files.clone(),
    ));

    // Pipeline.
    let normalizer = Arc::new(Normalizer::new(
        platform_files,
        files_api,
        speech.clone(),
        Arc::clone(&store),
    ));
    let normalization_tracker = Arc::new(NormalizationTracker::new());
    let media_group_tracker = Arc::new(MediaGroupTracker::default());
    let generation_tracker = Arc::new(GenerationTracker::new());
    let limiter = Arc::new(ConcurrencyLimiter::new(
        config.limits.max_concurrent_generations_per_user,
        Duration::from_secs_f64(config.limits.concurrency_queue_timeout_secs),
    ));
    let router = Arc::new(TopicRouter::new(
        client.clone(),
        Arc::clone(&store),
        config.topics.clone(),
    ));

    // Tools.
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(AnalyzeImage { client: client.clone() }),
        Arc::new(AnalyzePdf { client: client.clone() }),
        Arc::new(TranscribeAudio {
            files: Arc::clone(&file_manager),
            speech,
        }),
        Arc::new(ExecutePython {
            exec: ExecClient::new(config.services.exec_base_url.clone()),
            files: Arc::clone(&file_manager),
            exec_cache: Arc::clone(&exec_cache),
        }),
        Arc::new(GenerateImage {
            client: ImageGenClient::new(config.services.imagegen_base_url.clone()),
            files: Arc::clone(&file_manager),
        }),
        Arc::new(DeliverFile {
            files: Arc::clone(&file_manager),
        }),
        Arc::new(PreviewFile {
            files: Arc::clone(&file_manager),
            client: client.clone(),
        }),
        Arc::new(WebSearch { client: client.clone() }),
        Arc::new(WebFetch { client: client.clone() }),
        Arc::new(RenderLatex {
            client: LatexClient::new(config.services.latex_base_url.clone()),
        }),
    ];
    let registry = Arc::new(ToolRegistry::new(tools, &config.tools.paid_tools));

    // Executor.
    let parse_mode = quill_executor::display::ParseMode::from_str(&config.telegram.parse_mode)
        .unwrap_or(quill_executor::display::ParseMode::MarkdownV2);
    let executor = Arc::new(ToolLoopExecutor::new(ExecutorDeps {
        store: Arc::clone(&store),
        ledger: Arc::clone(&ledger),
        client,
        registry,
        writer: writer.clone(),
        limiter: Arc::clone(&limiter),
        config: ExecutorConfig {
            default_model: config.claude.model.clone(),
            max_tokens: config.claude.max_tokens,
            max_iterations: config.tools.max_iterations,
            cost_cap: usd_from_f64(config.billing.cost_cap_usd),
            global_system_prompt: GLOBAL_SYSTEM_PROMPT.to_string(),
            parse_mode,
            precheck_enabled: config.billing.tool_cost_precheck_enabled,
            files_ttl_hours: config.files.files_api_ttl_hours,
        },
    }));

    // Context is built in two steps: the queue's processor needs the context
    // itself, so wire the queue after the rest.
    let ctx = Arc::new_cyclic(|weak: &std::sync::Weak<AppContext>| {
        let processor = Arc::new(TelegramBatchProcessor {
            ctx_weak: weak.clone(),
        });
        let queue = Arc::new(PerThreadQueue::new(
            processor,
            Arc::clone(&normalization_tracker),
            Arc::clone(&media_group_tracker),
        ));
        AppContext {
            config,
            store,
            user_cache,
            exec_cache,
            bytes_cache,
            thread_cache,
            writer,
            ledger,
            payments,
            normalizer,
            normalization_tracker,
            media_group_tracker,
            generation_tracker,
            limiter,
            queue,
            router,
            executor,
            bot: bot.clone(),
        }
    });

    TelegramAdapter::new(ctx).run().await;
    Ok(())
}
