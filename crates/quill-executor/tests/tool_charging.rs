//! Charging semantics of the tool dispatcher against a real in-memory store:
//! a result with `cost_usd` is charged exactly once, `_already_charged`
//! suppresses the charge, and the balance pre-check rejects paid tools for
//! negative balances without touching the ledger.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use quill_cache::{ToolCallWriter, UserCache};
use quill_claude::ToolCall;
use quill_core::Usd;
use quill_executor::dispatch::Dispatcher;
use quill_executor::display::ParseMode;
use quill_executor::draft::{DeliverableFile, DraftSink};
use quill_executor::session::StreamingSession;
use quill_executor::tools::registry::ToolRegistry;
use quill_executor::tools::{Invocation, Tool};
use quill_ledger::BalanceService;
use quill_store::{users, Store};

struct NullSink;

#[async_trait]
impl DraftSink for NullSink {
    async fn update(&self, _display: &str) -> quill_core::Result<()> {
        Ok(())
    }
    async fn commit_part(&self, _final_text: &str) -> quill_core::Result<i64> {
        Ok(1)
    }
    async fn send_file(&self, _file: &DeliverableFile) -> quill_core::Result<i64> {
        Ok(2)
    }
    async fn discard(&self) -> quill_core::Result<()> {
        Ok(())
    }
}

/// A tool that returns a canned result.
struct Canned {
    name: &'static str,
    result: Value,
}

#[async_trait]
impl Tool for Canned {
    fn name(&self) -> &'static str {
        self.name
    }
    fn description(&self) -> &'static str {
        "canned"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _input: Value, _inv: &Invocation) -> Value {
        self.result.clone()
    }
}

struct Harness {
    ledger: Arc<BalanceService>,
    dispatcher: Dispatcher,
}

fn harness(initial_balance: Usd) -> Harness {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .with_conn(|conn| {
            users::get_or_create(conn, 1, Some("alice"), None, None, "m")?;
            users::set_balance(conn, 1, initial_balance)?;
            Ok(())
        })
        .unwrap();

    let cache = Arc::new(UserCache::new());
    let ledger = Arc::new(BalanceService::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        Usd::ZERO,
    ));

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(Canned {
            name: "paid_tool",
            result: json!({"answer": 42, "cost_usd": "0.0500"}),
        }),
        Arc::new(Canned {
            name: "precharged_tool",
            result: json!({"answer": 7, "cost_usd": "0.0500", "_already_charged": true}),
        }),
        Arc::new(Canned {
            name: "free_tool",
            result: json!({"ok": true}),
        }),
        Arc::new(Canned {
            name: "generate_image",
            result: json!({"mode": "generate", "cost_usd": "0.0400"}),
        }),
    ];
    let registry = Arc::new(ToolRegistry::new(
        tools,
        &["paid_tool".to_string(), "precharged_tool".to_string(), "generate_image".to_string()],
    ));

    let dispatcher = Dispatcher {
        registry,
        ledger: Arc::clone(&ledger),
        writer: ToolCallWriter::spawn(Arc::clone(&store)),
        precheck_enabled: true,
    };
    Harness { ledger, dispatcher }
}

fn invocation() -> Invocation {
    Invocation {
        user_id: 1,
        chat_id: 10,
        thread_id: 20,
        message_id: 30,
        model_id: "claude-sonnet-4-5".into(),
        cancel: CancellationToken::new(),
    }
}

fn session() -> StreamingSession {
    StreamingSession::new(Arc::new(NullSink), ParseMode::Html, 20)
}

fn call(name: &str) -> ToolCall {
    ToolCall {
        id: format!("tu_{name}"),
        name: name.into(),
        input: json!({}),
    }
}

#[tokio::test]
async fn cost_usd_is_charged_exactly_once() {
    let h = harness(Usd::new(dec!(1)));
    let mut s = session();

    let outcome = h
        .dispatcher
        .execute_batch(vec![call("paid_tool")], &invocation(), &mut s)
        .await;

    assert!(!outcome.outcomes[0].is_error);
    assert_eq!(outcome.total_cost.to_string(), "0.0500");
    assert_eq!(h.ledger.get_balance(1).unwrap().to_string(), "0.9500");

    let history = h.ledger.balance_history(1, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount.to_string(), "-0.0500");
    assert_eq!(history[0].related_message_id, Some(30));
    assert!(h.ledger.verify_integrity(1).unwrap());
}

#[tokio::test]
async fn already_charged_is_never_recharged() {
    let h = harness(Usd::new(dec!(1)));
    let mut s = session();

    h.dispatcher
        .execute_batch(vec![call("precharged_tool")], &invocation(), &mut s)
        .await;

    assert_eq!(h.ledger.get_balance(1).unwrap().to_string(), "1.0000");
    assert!(h.ledger.balance_history(1, 10).unwrap().is_empty());
}

#[tokio::test]
async fn free_tools_cost_nothing() {
    let h = harness(Usd::new(dec!(0.5)));
    let mut s = session();

    let outcome = h
        .dispatcher
        .execute_batch(vec![call("free_tool")], &invocation(), &mut s)
        .await;

    assert!(!outcome.outcomes[0].is_error);
    assert!(outcome.total_cost.is_zero());
    assert_eq!(h.ledger.get_balance(1).unwrap().to_string(), "0.5000");
}

#[tokio::test]
async fn negative_balance_rejects_paid_tool_without_ledger_write() {
    // S2: balance −0.08, generate_image("a cat") → synthetic rejection,
    // ledger untouched, precheck metric bumped.
    let h = harness(Usd::new(dec!(-0.08)));
    let mut s = session();
    let before = quill_core::metrics::snapshot().tool_precheck_rejected;

    let mut image_call = call("generate_image");
    image_call.input = json!({"prompt": "a cat"});
    let outcome = h
        .dispatcher
        .execute_batch(vec![image_call], &invocation(), &mut s)
        .await;

    let result = &outcome.outcomes[0];
    assert!(result.is_error);
    assert_eq!(result.clean["error"], "insufficient_balance");
    assert_eq!(result.clean["balance_usd"], "-0.0800");
    assert_eq!(result.clean["tool_name"], "generate_image");

    assert_eq!(h.ledger.get_balance(1).unwrap().to_string(), "-0.0800");
    assert!(h.ledger.balance_history(1, 10).unwrap().is_empty());
    assert_eq!(
        quill_core::metrics::snapshot().tool_precheck_rejected,
        before + 1
    );
}

#[tokio::test]
async fn batch_results_keep_call_order() {
    let h = harness(Usd::new(dec!(1)));
    let mut s = session();

    let outcome = h
        .dispatcher
        .execute_batch(
            vec![call("free_tool"), call("paid_tool"), call("precharged_tool")],
            &invocation(),
            &mut s,
        )
        .await;

    let names: Vec<_> = outcome.outcomes.iter().map(|o| o.call.name.as_str()).collect();
    assert_eq!(names, vec!["free_tool", "paid_tool", "precharged_tool"]);
}
