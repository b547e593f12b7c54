use std::collections::HashSet;
use std::sync::Arc;

use quill_claude::ToolDefinition;

use super::Tool;

/// Marker emoji shown next to a running tool in the draft.
pub fn tool_emoji(name: &str) -> &'static str {
    match name {
        "analyze_image" => "🖼",
        "analyze_pdf" => "📄",
        "transcribe_audio" => "🎙",
        "execute_python" => "🐍",
        "generate_image" => "🎨",
        "deliver_file" => "📎",
        "preview_file" => "👀",
        "web_search" => "🔎",
        "web_fetch" => "🌐",
        "render_latex" => "🧮",
        _ => "🔧",
    }
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    paid: HashSet<String>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>, paid_tools: &[String]) -> Self {
        Self {
            tools,
            paid: paid_tools.iter().cloned().collect(),
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// A tool is paid iff its name is registered as paid — configuration,
    /// not a property of the tool itself.
    pub fn is_paid(&self, name: &str) -> bool {
        self.paid.contains(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Dummy;

    #[async_trait]
    impl Tool for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }
        fn description(&self) -> &'static str {
            "does nothing"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _input: Value, _inv: &super::super::Invocation) -> Value {
            json!({"ok": true})
        }
    }

    #[test]
    fn paid_set_comes_from_config() {
        let reg = ToolRegistry::new(vec![Arc::new(Dummy)], &["dummy".to_string()]);
        assert!(reg.is_paid("dummy"));
        assert!(!reg.is_paid("render_latex"));
        assert!(reg.find("dummy").is_some());
        assert!(reg.find("missing").is_none());
    }

    #[test]
    fn definitions_expose_schema() {
        let reg = ToolRegistry::new(vec![Arc::new(Dummy)], &[]);
        let defs = reg.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "dummy");
    }

    #[test]
    fn unknown_tool_gets_wrench_emoji() {
        assert_eq!(tool_emoji("no_such_tool"), "🔧");
        assert_eq!(tool_emoji("web_search"), "🔎");
    }
}
