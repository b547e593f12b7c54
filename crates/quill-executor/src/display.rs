//! Display blocks for the streaming draft.
//!
//! Two visual layers: *thinking* (collapsed into an expandable blockquote,
//! also hosts tool markers) and *text* (the visible answer). Blocks keep
//! their interleaving order; formatting flattens them into the two layers.

use crate::markdown::escape_markdown_v2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Thinking,
    Text,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    MarkdownV2,
    Html,
}

#[derive(Default)]
pub struct DisplayManager {
    blocks: Vec<Block>,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append content, merging into the trailing block when kinds match.
    pub fn append(&mut self, kind: BlockKind, content: &str) {
        if let Some(last) = self.blocks.last_mut() {
            if last.kind == kind {
                last.content.push_str(content);
                return;
            }
        }
        self.blocks.push(Block {
            kind,
            content: content.to_string(),
        });
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    pub fn last_thinking(&self) -> Option<&str> {
        self.blocks
            .iter()
            .rev()
            .find(|b| b.kind == BlockKind::Thinking)
            .map(|b| b.content.as_str())
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Raw concatenation of one layer.
    pub fn raw_layer(&self, kind: BlockKind) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind == kind)
            .map(|b| b.content.as_str())
            .collect()
    }

    /// Render both layers in the requested parse mode (untruncated).
    pub fn format_layers(&self, mode: ParseMode) -> (String, String) {
        let thinking_raw = self.raw_layer(BlockKind::Thinking);
        let text_raw = self.raw_layer(BlockKind::Text);

        let thinking = if thinking_raw.trim().is_empty() {
            String::new()
        } else {
            format_thinking(&thinking_raw, mode)
        };
        let text = match mode {
            ParseMode::MarkdownV2 => escape_markdown_v2(&text_raw),
            ParseMode::Html => html_escape(&text_raw),
        };
        (thinking, text)
    }
}

/// Wrap thinking content in the platform's expandable blockquote.
pub fn format_thinking(raw: &str, mode: ParseMode) -> String {
    match mode {
        ParseMode::Html => format!(
            "<blockquote expandable>{}</blockquote>",
            html_escape(raw.trim())
        ),
        ParseMode::MarkdownV2 => {
            // Expandable quote: every line prefixed with '>', terminated '||'.
            let escaped = escape_markdown_v2(raw.trim());
            let quoted: Vec<String> = escaped
                .lines()
                .map(|line| format!(">{line}"))
                .collect();
            format!("**{}||", quoted.join("\n"))
        }
    }
}

pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_merges_same_kind() {
        let mut dm = DisplayManager::new();
        dm.append(BlockKind::Thinking, "first ");
        dm.append(BlockKind::Thinking, "second");
        dm.append(BlockKind::Text, "answer");
        assert_eq!(dm.blocks().len(), 2);
        assert_eq!(dm.raw_layer(BlockKind::Thinking), "first second");
        assert_eq!(dm.raw_layer(BlockKind::Text), "answer");
    }

    #[test]
    fn html_layers_use_expandable_blockquote() {
        let mut dm = DisplayManager::new();
        dm.append(BlockKind::Thinking, "pondering <deeply>");
        dm.append(BlockKind::Text, "done");
        let (thinking, text) = dm.format_layers(ParseMode::Html);
        assert!(thinking.starts_with("<blockquote expandable>"));
        assert!(thinking.contains("&lt;deeply&gt;"));
        assert_eq!(text, "done");
    }

    #[test]
    fn md2_thinking_is_quote_prefixed() {
        let mut dm = DisplayManager::new();
        dm.append(BlockKind::Thinking, "line one\nline two");
        let (thinking, _) = dm.format_layers(ParseMode::MarkdownV2);
        assert!(thinking.starts_with("**>"));
        assert!(thinking.ends_with("||"));
        assert!(thinking.contains("\n>line two"));
    }

    #[test]
    fn empty_thinking_renders_empty() {
        let mut dm = DisplayManager::new();
        dm.append(BlockKind::Text, "just text");
        let (thinking, text) = dm.format_layers(ParseMode::MarkdownV2);
        assert!(thinking.is_empty());
        assert_eq!(text, "just text");
    }

    #[test]
    fn last_thinking_sees_interleaved_blocks() {
        let mut dm = DisplayManager::new();
        dm.append(BlockKind::Thinking, "a");
        dm.append(BlockKind::Text, "t");
        dm.append(BlockKind::Thinking, "[🔎 web_search]");
        assert_eq!(dm.last_thinking(), Some("[🔎 web_search]"));
    }
}
