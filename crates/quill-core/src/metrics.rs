//! Process-local operational counters.
//!
//! Plain atomics — cheap enough to record from any hot path. Costs are
//! accumulated in micro-USD so the counter stays integral.

use std::sync::atomic::{AtomicU64, Ordering};

static MESSAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static BATCHES_PROCESSED: AtomicU64 = AtomicU64::new(0);
static TOOL_CALLS_OK: AtomicU64 = AtomicU64::new(0);
static TOOL_CALLS_FAILED: AtomicU64 = AtomicU64::new(0);
static TOOL_PRECHECK_REJECTED: AtomicU64 = AtomicU64::new(0);
static COST_MICRO_USD: AtomicU64 = AtomicU64::new(0);
static ERRORS: AtomicU64 = AtomicU64::new(0);
static GENERATIONS_CANCELLED: AtomicU64 = AtomicU64::new(0);

pub fn record_message_received() {
    MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_processed() {
    BATCHES_PROCESSED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_tool_call(success: bool) {
    if success {
        TOOL_CALLS_OK.fetch_add(1, Ordering::Relaxed);
    } else {
        TOOL_CALLS_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_precheck_rejected() {
    TOOL_PRECHECK_REJECTED.fetch_add(1, Ordering::Relaxed);
}

/// `amount_usd` is truncated to whole micro-dollars.
pub fn record_cost(amount_usd: f64) {
    let micro = (amount_usd * 1_000_000.0).max(0.0) as u64;
    COST_MICRO_USD.fetch_add(micro, Ordering::Relaxed);
}

pub fn record_error() {
    ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_generation_cancelled() {
    GENERATIONS_CANCELLED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub batches_processed: u64,
    pub tool_calls_ok: u64,
    pub tool_calls_failed: u64,
    pub tool_precheck_rejected: u64,
    pub cost_micro_usd: u64,
    pub errors: u64,
    pub generations_cancelled: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        messages_received: MESSAGES_RECEIVED.load(Ordering::Relaxed),
        batches_processed: BATCHES_PROCESSED.load(Ordering::Relaxed),
        tool_calls_ok: TOOL_CALLS_OK.load(Ordering::Relaxed),
        tool_calls_failed: TOOL_CALLS_FAILED.load(Ordering::Relaxed),
        tool_precheck_rejected: TOOL_PRECHECK_REJECTED.load(Ordering::Relaxed),
        cost_micro_usd: COST_MICRO_USD.load(Ordering::Relaxed),
        errors: ERRORS.load(Ordering::Relaxed),
        generations_cancelled: GENERATIONS_CANCELLED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precheck_counter_increments() {
        let before = snapshot().tool_precheck_rejected;
        record_precheck_rejected();
        assert_eq!(snapshot().tool_precheck_rejected, before + 1);
    }

    #[test]
    fn cost_accumulates_micro_usd() {
        let before = snapshot().cost_micro_usd;
        record_cost(0.05);
        assert_eq!(snapshot().cost_micro_usd, before + 50_000);
    }
}
