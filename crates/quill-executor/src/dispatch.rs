//! Parallel tool execution with cost accounting.
//!
//! All pending tools run concurrently; results are handled as they complete
//! so file deliveries reach the user before slower siblings finish. Charging
//! honors the at-most-once contract: a result with `cost_usd` and without
//! `_already_charged` is charged exactly once; everything else never.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use quill_claude::ToolCall;
use quill_core::Usd;
use quill_ledger::BalanceService;
use quill_store::types::NewToolCall;

use crate::precheck::precheck_tools;
use crate::session::StreamingSession;
use crate::tools::registry::ToolRegistry;
use crate::tools::{decode_file_content, tool_error, Invocation};

pub struct ToolOutcome {
    pub call: ToolCall,
    /// Result with metadata keys stripped — what the model sees.
    pub clean: Value,
    pub is_error: bool,
    pub duration_secs: f64,
    pub cost: Usd,
    pub force_turn_break: bool,
}

pub struct BatchOutcome {
    /// In the original call order.
    pub outcomes: Vec<ToolOutcome>,
    pub force_turn_break: bool,
    pub turn_break_tool: Option<String>,
    pub total_cost: Usd,
}

pub struct Dispatcher {
    pub registry: Arc<ToolRegistry>,
    pub ledger: Arc<BalanceService>,
    pub writer: quill_cache::ToolCallWriter,
    pub precheck_enabled: bool,
}

impl Dispatcher {
    /// Execute one iteration's pending tools.
    pub async fn execute_batch(
        &self,
        calls: Vec<ToolCall>,
        inv: &Invocation,
        session: &mut StreamingSession,
    ) -> BatchOutcome {
        if calls.is_empty() {
            return BatchOutcome {
                outcomes: Vec::new(),
                force_turn_break: false,
                turn_break_tool: None,
                total_cost: Usd::ZERO,
            };
        }

        info!(
            thread_id = inv.thread_id,
            count = calls.len(),
            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "tool batch start"
        );

        let balance = self.ledger.cached_balance(inv.user_id);
        let rejections = precheck_tools(&calls, &self.registry, balance, self.precheck_enabled);

        let mut join_set: JoinSet<(usize, Value, f64)> = JoinSet::new();
        let mut slots: Vec<Option<ToolOutcome>> = Vec::with_capacity(calls.len());
        for _ in &calls {
            slots.push(None);
        }

        for (idx, (call, rejection)) in calls.iter().zip(rejections).enumerate() {
            if let Some(rejection) = rejection {
                slots[idx] = Some(ToolOutcome {
                    call: call.clone(),
                    clean: rejection,
                    is_error: true,
                    duration_secs: 0.0,
                    cost: Usd::ZERO,
                    force_turn_break: false,
                });
                continue;
            }

            let Some(tool) = self.registry.find(&call.name) else {
                slots[idx] = Some(ToolOutcome {
                    call: call.clone(),
                    clean: tool_error(format!("unknown tool: {}", call.name)),
                    is_error: true,
                    duration_secs: 0.0,
                    cost: Usd::ZERO,
                    force_turn_break: false,
                });
                continue;
            };

            let input = call.input.clone();
            let inv = inv.clone();
            join_set.spawn(async move {
                let started = Instant::now();
                let raw = tool.execute(input, &inv).await;
                (idx, raw, started.elapsed().as_secs_f64())
            });
        }

        let mut force_turn_break = false;
        let mut turn_break_tool = None;
        let mut total_cost = Usd::ZERO;

        while let Some(joined) = join_set.join_next().await {
            let (idx, raw, duration) = match joined {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "tool task panicked");
                    continue;
                }
            };
            let call = &calls[idx];
            let outcome = self.handle_result(call, raw, duration, inv, session).await;
            if outcome.force_turn_break {
                force_turn_break = true;
                turn_break_tool = Some(call.name.clone());
            }
            total_cost += outcome.cost;
            slots[idx] = Some(outcome);
        }

        let outcomes: Vec<ToolOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| ToolOutcome {
                    call: calls[idx].clone(),
                    clean: tool_error("tool task failed"),
                    is_error: true,
                    duration_secs: 0.0,
                    cost: Usd::ZERO,
                    force_turn_break: false,
                })
            })
            .collect();

        info!(
            thread_id = inv.thread_id,
            errors = outcomes.iter().filter(|o| o.is_error).count(),
            total_cost = %total_cost,
            force_turn_break,
            "tool batch complete"
        );

        BatchOutcome {
            outcomes,
            force_turn_break,
            turn_break_tool,
            total_cost,
        }
    }

    async fn handle_result(
        &self,
        call: &ToolCall,
        raw: Value,
        duration: f64,
        inv: &Invocation,
        session: &mut StreamingSession,
    ) -> ToolOutcome {
        let is_error = raw.get("error").is_some();
        let clean = strip_metadata(&raw);

        if is_error {
            quill_core::metrics::record_tool_call(false);
            quill_core::metrics::record_error();
            return ToolOutcome {
                call: call.clone(),
                clean,
                is_error: true,
                duration_secs: duration,
                cost: Usd::ZERO,
                force_turn_break: false,
            };
        }

        // File delivery — skipped entirely once cancellation fired.
        if let Some(entries) = raw.get("_file_contents").and_then(|v| v.as_array()) {
            if inv.cancel.is_cancelled() {
                info!(tool = %call.name, "file delivery skipped: cancelled");
            } else {
                let files: Vec<_> = entries.iter().filter_map(decode_file_content).collect();
                if let Err(e) = session.deliver_files(files).await {
                    warn!(tool = %call.name, error = %e, "file delivery failed");
                }
            }
        }

        let force_turn_break = raw
            .get("_force_turn_break")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // Charging: cost_usd present and not pre-charged by the tool itself.
        let mut cost = Usd::ZERO;
        let already_charged = raw
            .get("_already_charged")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let Some(cost_str) = raw.get("cost_usd").and_then(|v| v.as_str()) {
            if let Ok(parsed) = Usd::from_str(cost_str) {
                cost = parsed;
                quill_core::metrics::record_cost(
                    cost_str.parse::<f64>().unwrap_or(0.0),
                );
                if !already_charged && cost.is_positive() {
                    let description = format!("Tool: {}", call.name);
                    if let Err(e) = self.ledger.charge(
                        inv.user_id,
                        cost,
                        &description,
                        Some(inv.message_id),
                    ) {
                        warn!(tool = %call.name, error = %e, "tool charge failed");
                    }
                }
            }
        }

        quill_core::metrics::record_tool_call(true);

        // Audit row when the tool consumed model tokens.
        if let Some(model_id) = raw.get("_model_id").and_then(|v| v.as_str()) {
            let grab = |key: &str| raw.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
            self.writer.queue(NewToolCall {
                user_id: inv.user_id,
                chat_id: inv.chat_id,
                thread_id: inv.thread_id,
                message_id: inv.message_id,
                tool_name: call.name.clone(),
                model_id: model_id.to_string(),
                input_tokens: grab("_input_tokens"),
                output_tokens: grab("_output_tokens"),
                cache_read_tokens: grab("_cache_read_tokens"),
                cache_creation_tokens: grab("_cache_creation_tokens"),
                cost_usd: cost,
                duration_ms: Some((duration * 1000.0) as i64),
                success: true,
            });
        }

        ToolOutcome {
            call: call.clone(),
            clean,
            is_error: false,
            duration_secs: duration,
            cost,
            force_turn_break,
        }
    }
}

/// Drop `_`-prefixed metadata keys; the model only sees the clean result.
fn strip_metadata(raw: &Value) -> Value {
    match raw.as_object() {
        Some(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => raw.clone(),
    }
}

/// Build the tool_result user message fed back into the loop.
pub fn tool_results_message(outcomes: &[ToolOutcome]) -> Value {
    let content: Vec<Value> = outcomes
        .iter()
        .map(|o| {
            json!({
                "type": "tool_result",
                "tool_use_id": o.call.id,
                "content": serde_json::to_string(&o.clean).unwrap_or_default(),
                "is_error": o.is_error,
            })
        })
        .collect();
    json!({ "role": "user", "content": content })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_keys_are_stripped() {
        let raw = json!({
            "stdout": "hi",
            "cost_usd": "0.0050",
            "_duration": 1.2,
            "_model_id": "m",
            "_file_contents": [],
        });
        let clean = strip_metadata(&raw);
        assert!(clean.get("stdout").is_some());
        assert!(clean.get("cost_usd").is_some());
        assert!(clean.get("_duration").is_none());
        assert!(clean.get("_model_id").is_none());
        assert!(clean.get("_file_contents").is_none());
    }

    #[test]
    fn tool_results_message_shape() {
        let outcomes = vec![ToolOutcome {
            call: ToolCall {
                id: "tu_9".into(),
                name: "web_search".into(),
                input: json!({}),
            },
            clean: json!({"results": "found"}),
            is_error: false,
            duration_secs: 0.5,
            cost: Usd::ZERO,
            force_turn_break: false,
        }];
        let msg = tool_results_message(&outcomes);
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "tu_9");
        assert_eq!(msg["content"][0]["is_error"], false);
    }
}
