//! Outbound message splitting and chunked sending.
//!
//! Telegram rejects messages over 4096 characters, so finalized text is cut
//! into parts at line boundaries. A part that would end inside a fenced code
//! block gets the fence closed before the cut and reopened (with its language
//! tag) at the top of the next part, so every part renders on its own.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ThreadId};
use tracing::warn;

use quill_executor::markdown::escape_markdown_v2;

/// Per-part cap, a little under the 4096 platform limit.
pub const PART_LIMIT: usize = 4090;
/// Bytes reserved for the `\n```\` that closes a fence at a part boundary.
const FENCE_CLOSE_ROOM: usize = 4;
/// Hard-wrap width for pathological single lines; the slack covers a fence
/// reopen at the top of the part plus the closing fence at its bottom.
const MAX_LINE: usize = PART_LIMIT - 64;

/// Split `text` into parts that each fit one platform message.
pub fn split_message(text: &str) -> Vec<String> {
    if text.len() <= PART_LIMIT {
        return vec![text.to_string()];
    }

    let mut parts: Vec<String> = Vec::new();
    let mut part = String::new();
    // Language tag of the fence the cursor is currently inside, if any.
    let mut open_fence: Option<String> = None;

    for raw_line in text.split('\n') {
        for line in hard_wrap(raw_line, MAX_LINE) {
            let budget = if open_fence.is_some() {
                PART_LIMIT - FENCE_CLOSE_ROOM
            } else {
                PART_LIMIT
            };
            if !part.is_empty() && part.len() + 1 + line.len() > budget {
                // Cut here; keep the fence balanced on both sides of the cut.
                if open_fence.is_some() {
                    part.push_str("\n```");
                }
                parts.push(std::mem::take(&mut part));
                if let Some(tag) = &open_fence {
                    part.push_str("```");
                    part.push_str(tag);
                    part.push('\n');
                }
            }

            if !part.is_empty() && !part.ends_with('\n') {
                part.push('\n');
            }
            part.push_str(&line);

            if let Some(tag) = fence_tag(&line) {
                open_fence = match open_fence {
                    Some(_) => None,
                    None => Some(tag.to_string()),
                };
            }
        }
    }

    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// A line opening or closing a fence; returns its language tag.
fn fence_tag(line: &str) -> Option<&str> {
    line.trim_start().strip_prefix("```").map(str::trim)
}

/// Break one line that cannot fit a part, preferring space boundaries.
fn hard_wrap(line: &str, max: usize) -> Vec<String> {
    if line.len() <= max {
        return vec![line.to_string()];
    }
    let mut pieces = Vec::new();
    let mut rest = line;
    while rest.len() > max {
        let window_end = floor_char_boundary(rest, max);
        let cut = rest[..window_end]
            .rfind(' ')
            .filter(|&i| i > 0)
            .unwrap_or(window_end);
        pieces.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Largest index ≤ `i` that lands on a char boundary.
fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Send `text` as one or more parts, MarkdownV2 first with a plain-text
/// fallback per part. Returns the id of the last sent message.
pub async fn send_chunked(
    bot: &Bot,
    chat_id: ChatId,
    topic_id: Option<ThreadId>,
    text: &str,
) -> Option<MessageId> {
    let parts = split_message(text);
    let last_index = parts.len().saturating_sub(1);
    let mut last_id = None;

    for (i, part) in parts.iter().enumerate() {
        let escaped = escape_markdown_v2(part);
        let mut request = bot
            .send_message(chat_id, &escaped)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(topic) = topic_id {
            request = request.message_thread_id(topic);
        }

        match request.await {
            Ok(sent) => last_id = Some(sent.id),
            Err(_) => {
                // MarkdownV2 rejected — retry the part as plain text.
                let mut plain = bot.send_message(chat_id, part);
                if let Some(topic) = topic_id {
                    plain = plain.message_thread_id(topic);
                }
                match plain.await {
                    Ok(sent) => last_id = Some(sent.id),
                    Err(e) => warn!(error = %e, part = i, "plain-text fallback failed"),
                }
            }
        }

        if i < last_index {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    last_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_in_one_part() {
        assert_eq!(split_message("Hello, world!"), vec!["Hello, world!"]);
    }

    #[test]
    fn long_prose_splits_at_line_breaks() {
        let paragraph = "word ".repeat(400);
        let text = [paragraph.as_str(); 4].join("\n");
        let parts = split_message(&text);
        assert!(parts.len() >= 2);
        for p in &parts {
            assert!(p.len() <= PART_LIMIT, "part too large: {}", p.len());
        }
        // nothing lost except the separators the cut consumed
        let rejoined: usize = parts.iter().map(|p| p.len()).sum();
        assert!(rejoined >= text.len() - parts.len());
    }

    #[test]
    fn giant_unbroken_line_is_hard_wrapped() {
        let parts = split_message(&"z".repeat(12_000));
        assert!(parts.len() >= 3);
        assert!(parts.iter().all(|p| p.len() <= PART_LIMIT));
    }

    #[test]
    fn fence_reopens_with_its_language() {
        let mut text = String::from("```python\n");
        for i in 0..300 {
            text.push_str(&format!("value_{i} = compute({i})  # long-ish line\n"));
        }
        text.push_str("```\ndone");

        let parts = split_message(&text);
        assert!(parts.len() >= 2);
        for p in &parts[1..] {
            if p.contains("value_") {
                assert!(
                    p.starts_with("```python"),
                    "continuation part must reopen the fence: {}",
                    &p[..p.len().min(40)]
                );
            }
        }
        // every part closes what it opens
        for p in &parts {
            let fence_lines = p.lines().filter(|l| l.trim_start().starts_with("```")).count();
            assert_eq!(fence_lines % 2, 0, "unbalanced fences in part: {p}");
        }
    }

    #[test]
    fn closed_fence_is_not_reopened() {
        let mut text = String::from("```\nshort block\n```\n");
        text.push_str(&"after the block. ".repeat(400));
        let parts = split_message(&text);
        assert!(parts.len() >= 2);
        assert!(
            !parts[1].starts_with("```"),
            "prose after a closed fence must not reopen it"
        );
    }

    #[test]
    fn hard_wrap_prefers_spaces() {
        let pieces = hard_wrap("alpha beta gamma delta", 12);
        assert_eq!(pieces, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn hard_wrap_respects_char_boundaries() {
        let line = "é".repeat(50); // 2 bytes per char
        let pieces = hard_wrap(&line, 21);
        assert!(pieces.iter().all(|p| p.len() <= 21));
        assert_eq!(pieces.concat(), line);
    }
}
