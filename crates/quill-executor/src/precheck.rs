//! Per-tool balance gate.
//!
//! Paid tools are rejected with a synthetic `insufficient_balance` result
//! when the user's balance is strictly negative. Free tools always pass.
//! An unknown balance allows the call — blocking on a cache miss would
//! punish users for infrastructure hiccups.

use serde_json::{json, Value};
use tracing::info;

use quill_claude::ToolCall;
use quill_core::Usd;

use crate::tools::registry::ToolRegistry;

/// Rejections, index-aligned with `pending`. `None` = allowed to run.
pub fn precheck_tools(
    pending: &[ToolCall],
    registry: &ToolRegistry,
    balance: Option<Usd>,
    enabled: bool,
) -> Vec<Option<Value>> {
    if !enabled {
        return vec![None; pending.len()];
    }

    pending
        .iter()
        .map(|call| {
            if !registry.is_paid(&call.name) {
                return None;
            }
            let Some(balance) = balance else {
                return None; // unknown balance allows the call
            };
            if !balance.is_negative() {
                return None;
            }

            info!(
                tool = %call.name,
                balance = %balance,
                "paid tool rejected at pre-check"
            );
            quill_core::metrics::record_precheck_rejected();
            Some(json!({
                "error": "insufficient_balance",
                "message": format!(
                    "Balance is {balance} USD; top up to use {}.", call.name
                ),
                "balance_usd": balance.to_string(),
                "tool_name": call.name,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Invocation, Tool};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn description(&self) -> &'static str {
            ""
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _input: Value, _inv: &Invocation) -> Value {
            json!({})
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(
            vec![Arc::new(Named("generate_image")), Arc::new(Named("render_latex"))],
            &["generate_image".to_string()],
        )
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "tu_1".into(),
            name: name.into(),
            input: json!({"prompt": "a cat"}),
        }
    }

    #[test]
    fn negative_balance_rejects_paid_tool_with_s2_shape() {
        let rejections = precheck_tools(
            &[call("generate_image")],
            &registry(),
            Some(Usd::new(dec!(-0.08))),
            true,
        );
        let r = rejections[0].as_ref().expect("must be rejected");
        assert_eq!(r["error"], "insufficient_balance");
        assert_eq!(r["balance_usd"], "-0.0800");
        assert_eq!(r["tool_name"], "generate_image");
    }

    #[test]
    fn free_tool_passes_with_negative_balance() {
        let rejections = precheck_tools(
            &[call("render_latex")],
            &registry(),
            Some(Usd::new(dec!(-5))),
            true,
        );
        assert!(rejections[0].is_none());
    }

    #[test]
    fn zero_balance_is_not_negative() {
        let rejections =
            precheck_tools(&[call("generate_image")], &registry(), Some(Usd::ZERO), true);
        assert!(rejections[0].is_none());
    }

    #[test]
    fn unknown_balance_allows() {
        let rejections = precheck_tools(&[call("generate_image")], &registry(), None, true);
        assert!(rejections[0].is_none());
    }

    #[test]
    fn disabled_precheck_allows_everything() {
        let rejections = precheck_tools(
            &[call("generate_image")],
            &registry(),
            Some(Usd::new(dec!(-1))),
            false,
        );
        assert!(rejections[0].is_none());
    }
}
