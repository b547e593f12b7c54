//! Per-model token pricing, USD per million tokens.
//!
//! Cache reads are billed at 10% of input; cache writes at 125%.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use quill_core::Usd;

use crate::types::Usage;

struct ModelPrice {
    prefix: &'static str,
    input_per_mtok: Decimal,
    output_per_mtok: Decimal,
}

/// Longest-prefix match table. Order matters: more specific prefixes first.
fn price_table() -> [ModelPrice; 5] {
    [
        ModelPrice {
            prefix: "claude-opus-4",
            input_per_mtok: dec!(15),
            output_per_mtok: dec!(75),
        },
        ModelPrice {
            prefix: "claude-sonnet-4",
            input_per_mtok: dec!(3),
            output_per_mtok: dec!(15),
        },
        ModelPrice {
            prefix: "claude-3-7-sonnet",
            input_per_mtok: dec!(3),
            output_per_mtok: dec!(15),
        },
        ModelPrice {
            prefix: "claude-3-5-haiku",
            input_per_mtok: dec!(0.8),
            output_per_mtok: dec!(4),
        },
        ModelPrice {
            prefix: "claude-haiku-4",
            input_per_mtok: dec!(1),
            output_per_mtok: dec!(5),
        },
    ]
}

fn lookup(model: &str) -> (Decimal, Decimal) {
    for p in price_table().iter() {
        if model.starts_with(p.prefix) {
            return (p.input_per_mtok, p.output_per_mtok);
        }
    }
    // Unknown model — price at the sonnet tier rather than zero, so
    // accounting errs toward overcharging the operator, not the user.
    (dec!(3), dec!(15))
}

/// USD cost for one API turn.
pub fn turn_cost(model: &str, usage: &Usage) -> Usd {
    let (input_rate, output_rate) = lookup(model);
    let mtok = dec!(1000000);

    let input = Decimal::from(usage.input_tokens) * input_rate / mtok;
    let output = Decimal::from(usage.output_tokens) * output_rate / mtok;
    let cache_read = Decimal::from(usage.cache_read_input_tokens) * input_rate * dec!(0.1) / mtok;
    let cache_write =
        Decimal::from(usage.cache_creation_input_tokens) * input_rate * dec!(1.25) / mtok;

    Usd::new(input + output + cache_read + cache_write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_pricing() {
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            ..Default::default()
        };
        assert_eq!(turn_cost("claude-sonnet-4-5", &usage).to_string(), "18.0000");
    }

    #[test]
    fn cache_reads_are_discounted() {
        let usage = Usage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_input_tokens: 1_000_000,
            cache_creation_input_tokens: 0,
        };
        // 10% of $3
        assert_eq!(turn_cost("claude-sonnet-4-5", &usage).to_string(), "0.3000");
    }

    #[test]
    fn unknown_model_falls_back_to_sonnet_tier() {
        let usage = Usage {
            input_tokens: 1000,
            output_tokens: 0,
            ..Default::default()
        };
        assert_eq!(turn_cost("mystery-model", &usage).to_string(), "0.0030");
    }
}
