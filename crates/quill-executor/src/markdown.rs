//! MarkdownV2 helpers: escaping, truncation repair, tool-marker stripping.

/// Escape special characters for Telegram MarkdownV2.
///
/// MarkdownV2 requires escaping: `_ * [ ] ( ) ~ ` # + - = | { } . !`
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|' | '{'
            | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Close markup runs that a truncation cut mid-token.
///
/// Counts unescaped `*`, `_`, `` ` `` and ``` fences; an odd count means an
/// open run that Telegram would reject, so a closing token is appended.
pub fn fix_truncated_md2(text: &str) -> String {
    let mut fixed = text.to_string();

    // A trailing lone backslash is half an escape sequence.
    let trailing_backslashes = fixed.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_backslashes % 2 == 1 {
        fixed.pop();
    }

    let fence_count = count_unescaped_fences(&fixed);
    if fence_count % 2 == 1 {
        fixed.push_str("\n```");
        // inline counting below ignores backticks inside the fence we just closed
    }

    for marker in ['*', '_', '`'] {
        if count_unescaped(&fixed, marker) % 2 == 1 {
            fixed.push(marker);
        }
    }
    fixed
}

fn count_unescaped(text: &str, marker: char) -> usize {
    let mut count = 0;
    let mut escaped = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == marker {
            // Triple backticks are fences, not inline code.
            if marker == '`' && chars.peek() == Some(&'`') {
                chars.next();
                if chars.peek() == Some(&'`') {
                    chars.next();
                }
                continue;
            }
            count += 1;
        }
    }
    count
}

fn count_unescaped_fences(text: &str) -> usize {
    text.lines()
        .filter(|line| line.trim_start().starts_with("```"))
        .count()
}

/// Remove `[<emoji> tool_name…]` markers from finalized text.
/// Markers live on their own lines in the thinking stream but can leak into
/// committed parts when thinking is discarded.
pub fn strip_tool_markers(text: &str) -> String {
    let stripped: Vec<&str> = text
        .lines()
        .filter(|line| {
            let t = line.trim();
            !(t.starts_with('[') && t.ends_with(']') && !t.contains("]("))
        })
        .collect();
    let mut out = stripped.join("\n");
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_hits_all_specials() {
        let escaped = escape_markdown_v2("a.b!c(d)e[f]g-h");
        assert_eq!(escaped, "a\\.b\\!c\\(d\\)e\\[f\\]g\\-h");
    }

    #[test]
    fn escape_leaves_normal_chars() {
        assert_eq!(escape_markdown_v2("hello world 123"), "hello world 123");
    }

    #[test]
    fn unbalanced_bold_is_closed() {
        assert_eq!(fix_truncated_md2("some *bold tex"), "some *bold tex*");
    }

    #[test]
    fn balanced_markup_untouched() {
        assert_eq!(fix_truncated_md2("a *b* c _d_"), "a *b* c _d_");
    }

    #[test]
    fn trailing_escape_is_dropped() {
        assert_eq!(fix_truncated_md2("cut mid-escape \\"), "cut mid-escape ");
    }

    #[test]
    fn escaped_markers_do_not_count() {
        assert_eq!(fix_truncated_md2("not \\*bold\\*"), "not \\*bold\\*");
    }

    #[test]
    fn open_code_fence_is_closed() {
        let fixed = fix_truncated_md2("intro\n```rust\nlet x = 1;");
        assert!(fixed.ends_with("\n```"), "got: {fixed}");
    }

    #[test]
    fn tool_markers_are_stripped() {
        let text = "Answer part one.\n\n[🔎 web_search]\n\nAnswer part two.";
        assert_eq!(strip_tool_markers(text), "Answer part one.\n\nAnswer part two.");
    }

    #[test]
    fn markdown_links_survive_marker_stripping() {
        let text = "[a link](https://example.com)";
        assert_eq!(strip_tool_markers(text), text);
    }
}
