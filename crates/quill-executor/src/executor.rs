//! The tool-loop executor: one invocation per batch.
//!
//! Request assembly → streaming turn → tool dispatch → feed results back,
//! until `end_turn`, the iteration bound, the cost cap, or cancellation.
//! Whatever streamed is committed either way; charging covers completed
//! turns and executed tools only.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quill_claude::{pricing, AnthropicClient, ChatRequest, StreamEvent};
use quill_core::{QuillError, Result, Usd};
use quill_ledger::BalanceService;
use quill_pipeline::model::ProcessedMessage;
use quill_pipeline::ConcurrencyLimiter;
use quill_store::types::{FileKind, FileSource, NewMessage, NewUserFile, Role};
use quill_store::{files as file_repo, messages as message_repo, threads, users, Store};

use crate::dispatch::{tool_results_message, Dispatcher};
use crate::display::ParseMode;
use crate::draft::DraftSink;
use crate::history;
use crate::session::StreamingSession;
use crate::tools::registry::ToolRegistry;
use crate::tools::Invocation;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopVerdict {
    EndTurn,
    CostCap,
    MaxIterations,
    TurnBreak,
    Cancelled,
}

#[derive(Clone)]
pub struct ExecutorConfig {
    pub default_model: String,
    pub max_tokens: u32,
    pub max_iterations: usize,
    pub cost_cap: Usd,
    pub global_system_prompt: String,
    pub parse_mode: ParseMode,
    pub precheck_enabled: bool,
    pub files_ttl_hours: i64,
}

pub struct ExecutorDeps {
    pub store: Arc<Store>,
    pub ledger: Arc<BalanceService>,
    pub client: AnthropicClient,
    pub registry: Arc<ToolRegistry>,
    pub writer: quill_cache::ToolCallWriter,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub config: ExecutorConfig,
}

pub struct ToolLoopExecutor {
    deps: ExecutorDeps,
}

impl ToolLoopExecutor {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self { deps }
    }

    /// Run one batch to completion. The sink must already be bound to the
    /// batch's chat/topic.
    pub async fn run(
        &self,
        thread_id: i64,
        batch: Vec<ProcessedMessage>,
        sink: Arc<dyn DraftSink>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let user_id = first.meta.user_id;
        let chat_id = first.meta.chat_id;
        let first_message_id = first.meta.message_id;

        // Per-user concurrency gate; holds for the whole generation.
        let _permit = self.deps.limiter.acquire(user_id, thread_id).await?;

        let user = self
            .deps
            .store
            .with_conn(|conn| users::get_by_id(conn, user_id))?
            .ok_or(QuillError::UserNotFound { id: user_id })?;
        let model = if user.model.is_empty() {
            self.deps.config.default_model.clone()
        } else {
            user.model.clone()
        };

        // Request assembly: history + files section + the new batch.
        let (rows, thread_files) = self.deps.store.with_conn(|conn| {
            let rows = message_repo::list_for_thread(conn, thread_id)?;
            let files = file_repo::list_for_thread(conn, thread_id)?;
            Ok((rows, files))
        })?;
        let mut files_by_message: HashMap<i64, Vec<_>> = HashMap::new();
        for f in &thread_files {
            files_by_message.entry(f.message_id).or_default().push(f.clone());
        }
        let system = history::system_prompt(
            &self.deps.config.global_system_prompt,
            user.custom_prompt.as_deref(),
            &thread_files,
        );
        let mut messages = history::build_history(&rows, &files_by_message, first.meta.is_private);
        messages.extend(history::batch_messages(&batch));

        let mut session =
            StreamingSession::new(sink, self.deps.config.parse_mode, thread_id);
        let dispatcher = Dispatcher {
            registry: Arc::clone(&self.deps.registry),
            ledger: Arc::clone(&self.deps.ledger),
            writer: self.deps.writer.clone(),
            precheck_enabled: self.deps.config.precheck_enabled,
        };
        let invocation = Invocation {
            user_id,
            chat_id,
            thread_id,
            message_id: first_message_id,
            model_id: model.clone(),
            cancel: cancel.clone(),
        };

        let mut total_cost = Usd::ZERO;
        let mut verdict = LoopVerdict::MaxIterations;

        for iteration in 0..self.deps.config.max_iterations {
            session.reset_iteration();

            let mut request = ChatRequest::new(&model, &system, self.deps.config.max_tokens);
            request.messages = messages.clone();
            request.tools = self.deps.registry.definitions();

            info!(thread_id, iteration, model = %model, "tool loop iteration");
            let cancelled = self
                .stream_turn(&request, &mut session, &cancel)
                .await?;
            if cancelled {
                verdict = LoopVerdict::Cancelled;
                break;
            }

            // Charge the completed turn.
            let turn_cost = pricing::turn_cost(session.model(), &session.usage());
            if turn_cost.is_positive() {
                let description = format!("LLM generation ({})", session.model());
                if let Err(e) = self.deps.ledger.charge(
                    user_id,
                    turn_cost,
                    &description,
                    Some(first_message_id),
                ) {
                    warn!(user_id, error = %e, "turn charge failed");
                }
                total_cost += turn_cost;
            }

            if session.stop_reason() != "tool_use" {
                // end_turn, max_tokens, and anything model-specific all end
                // the loop with whatever streamed.
                verdict = LoopVerdict::EndTurn;
                break;
            }

            // Tool dispatch.
            let assistant_content: Vec<Value> = session.content_blocks().to_vec();
            messages.push(json!({ "role": "assistant", "content": assistant_content }));

            let calls = session.take_pending_tools();
            let outcome = dispatcher
                .execute_batch(calls, &invocation, &mut session)
                .await;
            total_cost += outcome.total_cost;
            messages.push(tool_results_message(&outcome.outcomes));

            if outcome.force_turn_break {
                info!(
                    thread_id,
                    tool = outcome.turn_break_tool.as_deref().unwrap_or(""),
                    "turn break requested"
                );
                verdict = LoopVerdict::TurnBreak;
                break;
            }

            if total_cost >= self.deps.config.cost_cap {
                warn!(thread_id, total_cost = %total_cost, cap = %self.deps.config.cost_cap, "cost cap reached");
                verdict = LoopVerdict::CostCap;
                break;
            }
        }

        // Commit whatever is on screen — cost-cap partials included.
        session.finish().await?;
        info!(thread_id, ?verdict, total_cost = %total_cost, "tool loop finished");

        self.commit(thread_id, &batch, &session)?;
        Ok(())
    }

    /// Consume one streaming turn into the session.
    /// Returns true when cancellation stopped the stream.
    async fn stream_turn(
        &self,
        request: &ChatRequest,
        session: &mut StreamingSession,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let client: AnthropicClient = self.deps.client.clone();
        let request = request.clone();
        let stream_task = tokio::spawn(async move { client.send_stream(&request, tx).await });

        let mut cancelled = false;
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => session.handle_event(event).await?,
                        None => break,
                    }
                }
                _ = cancel.cancelled() => {
                    // Stop consuming; dropping rx ends the producer.
                    cancelled = true;
                    break;
                }
            }
        }
        drop(rx);

        if !cancelled {
            match stream_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(QuillError::ExternalTransient {
                        service: "anthropic".into(),
                        message: e.to_string(),
                    })
                }
                Err(e) => return Err(QuillError::Internal(format!("stream task: {e}"))),
            }
        } else {
            stream_task.abort();
        }
        Ok(cancelled)
    }

    /// Persist the batch: user rows + their files, assistant part rows, and
    /// tool-delivered files. Duplicate platform ids (batch retry) are skipped.
    fn commit(
        &self,
        thread_id: i64,
        batch: &[ProcessedMessage],
        session: &StreamingSession,
    ) -> Result<()> {
        let expires_at = (chrono::Utc::now()
            + chrono::Duration::hours(self.deps.config.files_ttl_hours))
        .to_rfc3339();

        self.deps.store.with_conn(|conn| {
            let tx = conn.transaction()?;

            for msg in batch {
                let new_row = NewMessage {
                    thread_id,
                    chat_id: msg.meta.chat_id,
                    message_id: msg.meta.message_id,
                    role: Role::User,
                    text: if msg.text.is_empty() {
                        msg.transcript.as_ref().map(|t| t.text.clone())
                    } else {
                        Some(msg.text.clone())
                    },
                    forward_origin: msg.forward_from.clone(),
                    reply_snippet: msg.reply.as_ref().map(|r| r.snippet.clone()),
                    quote_text: msg.quote.clone(),
                    thinking_tokens: None,
                    text_tokens: None,
                };
                let row_id = match message_repo::insert(&tx, &new_row) {
                    Ok(id) => id,
                    Err(e) if e.is_unique_violation() => continue,
                    Err(e) => return Err(e),
                };

                for f in &msg.files {
                    file_repo::insert(
                        &tx,
                        &NewUserFile {
                            message_id: row_id,
                            thread_id,
                            filename: f.filename.clone(),
                            mime_type: f.mime_type.clone(),
                            file_size: f.file_size as i64,
                            file_kind: f.kind,
                            source: FileSource::User,
                            claude_file_id: Some(f.claude_file_id.clone()),
                            telegram_file_id: f.telegram_file_id.clone(),
                            telegram_file_unique_id: f.telegram_file_unique_id.clone(),
                            expires_at: Some(expires_at.clone()),
                        },
                    )?;
                }
            }

            let chat_id = batch.first().map(|m| m.meta.chat_id).unwrap_or(0);
            let mut first_assistant_row: Option<i64> = None;
            for (message_id, text) in session.final_parts() {
                let row = NewMessage {
                    thread_id,
                    chat_id,
                    message_id: *message_id,
                    role: Role::Assistant,
                    text: Some(text.clone()),
                    forward_origin: None,
                    reply_snippet: None,
                    quote_text: None,
                    thinking_tokens: None,
                    text_tokens: None,
                };
                match message_repo::insert(&tx, &row) {
                    Ok(id) => {
                        first_assistant_row.get_or_insert(id);
                    }
                    Err(e) if e.is_unique_violation() => continue,
                    Err(e) => return Err(e),
                }
            }

            // Tool-delivered files hang off the first assistant row, or the
            // first user row when the turn produced files without text.
            let owner_row = match first_assistant_row {
                Some(id) => Some(id),
                None => match batch.first() {
                    Some(msg) => message_repo::row_id_for_platform(
                        &tx,
                        msg.meta.chat_id,
                        msg.meta.message_id,
                    )?,
                    None => None,
                },
            };
            if let Some(owner) = owner_row {
                for (_, file) in session.delivered_files() {
                    file_repo::insert(
                        &tx,
                        &NewUserFile {
                            message_id: owner,
                            thread_id,
                            filename: file.filename.clone(),
                            mime_type: file.mime_type.clone(),
                            file_size: file.bytes.len() as i64,
                            file_kind: FileKind::Generated,
                            source: FileSource::Assistant,
                            claude_file_id: None,
                            telegram_file_id: None,
                            telegram_file_unique_id: None,
                            expires_at: None,
                        },
                    )?;
                }
            }

            threads::touch(&tx, thread_id)?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(())
    }
}

impl FromStr for ParseMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "MarkdownV2" => Ok(ParseMode::MarkdownV2),
            "HTML" => Ok(ParseMode::Html),
            other => Err(format!("unknown parse mode: {other}")),
        }
    }
}
