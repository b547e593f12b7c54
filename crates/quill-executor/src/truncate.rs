//! Fitting a draft into the platform message limit.
//!
//! Priority is fixed: visible text is never sacrificed for thinking. When
//! the combined draft exceeds the limit, thinking is trimmed from its start
//! (the most recent reasoning is the useful part); only when thinking is
//! gone may the text itself be cut, and MarkdownV2 cuts get a repair pass.

use crate::display::ParseMode;
use crate::markdown::fix_truncated_md2;

/// Platform message limit.
pub const MESSAGE_LIMIT: usize = 4096;

/// Safety margin for formatting overhead. MarkdownV2 needs the larger one
/// because escaping inflates the final payload.
const SAFETY_MARGIN_HTML: usize = 46;
const SAFETY_MARGIN_MD2: usize = 100;

/// Below this many characters, a trimmed thinking block is noise — hide it.
const MIN_THINKING_SPACE: usize = 100;

const ELLIPSIS: &str = "…";

pub struct TruncationManager {
    mode: ParseMode,
    effective_limit: usize,
}

impl TruncationManager {
    pub fn new(mode: ParseMode) -> Self {
        let margin = match mode {
            ParseMode::MarkdownV2 => SAFETY_MARGIN_MD2,
            ParseMode::Html => SAFETY_MARGIN_HTML,
        };
        Self {
            mode,
            effective_limit: MESSAGE_LIMIT - margin,
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.effective_limit
    }

    /// True when even an empty thinking block can't make the draft fit —
    /// the session must split the message.
    pub fn needs_split(&self, text_formatted: &str) -> bool {
        text_formatted.chars().count() >= self.effective_limit
    }

    /// Fit (thinking, text) into the limit. Text is returned verbatim unless
    /// it alone exceeds the limit.
    pub fn truncate_for_display(
        &self,
        thinking_formatted: &str,
        text_formatted: &str,
    ) -> (String, String) {
        let text_len = text_formatted.chars().count();
        let thinking_len = thinking_formatted.chars().count();

        if text_len + thinking_len <= self.effective_limit {
            return (thinking_formatted.to_string(), text_formatted.to_string());
        }

        // Text alone over the limit: drop thinking, cut text from the end
        // (the user has been reading the beginning while it streamed).
        if text_len >= self.effective_limit {
            let repair_reserve = match self.mode {
                ParseMode::MarkdownV2 => 20,
                ParseMode::Html => 0,
            };
            let keep = self.effective_limit - ELLIPSIS.chars().count() - repair_reserve;
            let mut cut: String = text_formatted.chars().take(keep).collect();
            cut.push_str(ELLIPSIS);
            if self.mode == ParseMode::MarkdownV2 {
                cut = fix_truncated_md2(&cut);
            }
            return (String::new(), cut);
        }

        // Trim thinking from the start into the remaining space.
        let trimmed = self.trim_thinking(thinking_formatted, self.effective_limit - text_len);
        (trimmed, text_formatted.to_string())
    }

    fn trim_thinking(&self, thinking: &str, available: usize) -> String {
        let (open, close) = match self.mode {
            ParseMode::Html => ("<blockquote expandable>", "</blockquote>"),
            ParseMode::MarkdownV2 => ("**", "||"),
        };
        let overhead = open.chars().count() + close.chars().count() + ELLIPSIS.chars().count();
        if available <= overhead + MIN_THINKING_SPACE {
            return String::new();
        }

        let inner = thinking
            .strip_prefix(open)
            .and_then(|s| s.strip_suffix(close))
            .unwrap_or(thinking);
        let inner_len = inner.chars().count();
        let budget = available - overhead;
        if inner_len <= budget {
            return thinking.to_string();
        }

        // Keep the tail: recent thinking matters, the start does not.
        let mut kept: String = inner.chars().skip(inner_len - budget).collect();
        if self.mode == ParseMode::MarkdownV2 {
            // The cut may have landed mid-escape or inside a quote prefix.
            kept = fix_truncated_md2(&kept);
            if !kept.starts_with('>') {
                kept = kept
                    .split_once('\n')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or(kept);
            }
        }
        format!("{open}{ELLIPSIS}{kept}{close}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::format_thinking;

    #[test]
    fn everything_fits_untouched() {
        let tm = TruncationManager::new(ParseMode::Html);
        let (thinking, text) = tm.truncate_for_display(
            "<blockquote expandable>short</blockquote>",
            "short answer",
        );
        assert_eq!(thinking, "<blockquote expandable>short</blockquote>");
        assert_eq!(text, "short answer");
    }

    #[test]
    fn text_is_preserved_verbatim_when_thinking_overflows() {
        let tm = TruncationManager::new(ParseMode::Html);
        let thinking = format_thinking(&"reasoning ".repeat(600), ParseMode::Html);
        let text = "the final answer".to_string();

        let (trimmed_thinking, out_text) = tm.truncate_for_display(&thinking, &text);
        assert_eq!(out_text, text, "text must never be truncated for thinking");
        let total = trimmed_thinking.chars().count() + out_text.chars().count();
        assert!(total <= tm.effective_limit());
        // recent thinking survives, the start is gone
        assert!(trimmed_thinking.contains("reasoning"));
        assert!(trimmed_thinking.contains('…'));
    }

    #[test]
    fn thinking_is_trimmed_from_the_start() {
        let tm = TruncationManager::new(ParseMode::Html);
        let mut inner = String::new();
        for i in 0..800 {
            inner.push_str(&format!("t{i} "));
        }
        let thinking = format_thinking(&inner, ParseMode::Html);
        let (trimmed, _) = tm.truncate_for_display(&thinking, "answer");
        assert!(!trimmed.contains("t0 "), "start of thinking must be dropped");
        assert!(trimmed.contains("t799"), "end of thinking must be kept");
    }

    #[test]
    fn tiny_leftover_space_hides_thinking() {
        let tm = TruncationManager::new(ParseMode::Html);
        let text: String = "x".repeat(tm.effective_limit() - 40);
        let thinking = format_thinking("deep thoughts here", ParseMode::Html);
        let (trimmed, out_text) = tm.truncate_for_display(&thinking, &text);
        assert!(trimmed.is_empty());
        assert_eq!(out_text, text);
    }

    #[test]
    fn oversized_text_is_cut_with_repair() {
        let tm = TruncationManager::new(ParseMode::MarkdownV2);
        let text = format!("*bold start* {}", "y".repeat(5000));
        let (thinking, cut) = tm.truncate_for_display("", &text);
        assert!(thinking.is_empty());
        assert!(cut.chars().count() <= tm.effective_limit());
        assert!(cut.contains('…'));
    }

    #[test]
    fn needs_split_detects_overflow() {
        let tm = TruncationManager::new(ParseMode::Html);
        assert!(!tm.needs_split("short"));
        assert!(tm.needs_split(&"x".repeat(5000)));
    }
}
