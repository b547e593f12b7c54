use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (quill.toml + QUILL_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuillConfig {
    pub telegram: TelegramConfig,
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub topics: TopicRoutingConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl QuillConfig {
    /// Load config: explicit path > QUILL_CONFIG env > ./quill.toml,
    /// then apply QUILL_* environment overrides (nested keys use `__`).
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        let file = path
            .map(str::to_string)
            .or_else(|| std::env::var("QUILL_CONFIG").ok())
            .unwrap_or_else(|| "quill.toml".to_string());

        Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("QUILL_").split("__"))
            .extract()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// User ids allowed to run ledger-adjusting commands.
    #[serde(default)]
    pub admin_ids: Vec<i64>,
    /// "MarkdownV2" (default) or "HTML" draft formatting.
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_generations_per_user: usize,
    #[serde(default = "default_queue_timeout")]
    pub concurrency_queue_timeout_secs: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations_per_user: default_max_concurrent(),
            concurrency_queue_timeout_secs: default_queue_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_stars_rate")]
    pub stars_to_usd_rate: f64,
    /// k1 — platform withdrawal fee.
    #[serde(default = "default_withdrawal_fee")]
    pub telegram_withdrawal_fee: f64,
    /// k2 — platform topics fee.
    #[serde(default = "default_topics_fee")]
    pub telegram_topics_fee: f64,
    /// k3 — operator margin, admin-settable. 0 ≤ k3 and k1+k2+k3 ≤ 1.
    #[serde(default)]
    pub default_owner_margin: f64,
    #[serde(default = "default_refund_days")]
    pub refund_period_days: i64,
    #[serde(default)]
    pub minimum_balance_for_request: f64,
    #[serde(default = "bool_true")]
    pub tool_cost_precheck_enabled: bool,
    /// Absolute USD ceiling per executor invocation.
    #[serde(default = "default_cost_cap")]
    pub cost_cap_usd: f64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stars_to_usd_rate: default_stars_rate(),
            telegram_withdrawal_fee: default_withdrawal_fee(),
            telegram_topics_fee: default_topics_fee(),
            default_owner_margin: 0.0,
            refund_period_days: default_refund_days(),
            minimum_balance_for_request: 0.0,
            tool_cost_precheck_enabled: true,
            cost_cap_usd: default_cost_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRoutingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_router_model")]
    pub model: String,
    #[serde(default = "default_router_max_tokens")]
    pub max_tokens: u32,
    /// Skip routing when the current topic was active this recently.
    #[serde(default = "default_min_gap_minutes")]
    pub switch_min_gap_minutes: i64,
    #[serde(default = "default_recent_topics")]
    pub recent_topics: usize,
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,
    #[serde(default = "default_msg_truncate")]
    pub msg_truncate: usize,
    #[serde(default = "default_topic_name_len")]
    pub temp_name_max_length: usize,
}

impl Default for TopicRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_router_model(),
            max_tokens: default_router_max_tokens(),
            switch_min_gap_minutes: default_min_gap_minutes(),
            recent_topics: default_recent_topics(),
            recent_messages: default_recent_messages(),
            msg_truncate: default_msg_truncate(),
            temp_name_max_length: default_topic_name_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// LLM-side file expiry; after this the claude_file_id handle is stale.
    #[serde(default = "default_files_ttl_hours")]
    pub files_api_ttl_hours: i64,
    /// Exec artifact TTL in the ephemeral cache.
    #[serde(default = "default_exec_ttl")]
    pub exec_file_ttl_secs: u64,
    #[serde(default = "default_exec_max_size")]
    pub exec_file_max_size: usize,
    /// Downloaded-bytes cache TTL.
    #[serde(default = "default_bytes_ttl")]
    pub bytes_cache_ttl_secs: u64,
    #[serde(default = "default_bytes_cap")]
    pub bytes_cache_max_entries: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            files_api_ttl_hours: default_files_ttl_hours(),
            exec_file_ttl_secs: default_exec_ttl(),
            exec_file_max_size: default_exec_max_size(),
            bytes_cache_ttl_secs: default_bytes_ttl(),
            bytes_cache_max_entries: default_bytes_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::new(self.max_retries, self.base_delay_secs, self.max_delay_secs)
    }
}

/// Base URLs of the sandboxed/external services the tools call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    /// Sandboxed Python execution service.
    #[serde(default)]
    pub exec_base_url: String,
    /// Image generation service.
    #[serde(default)]
    pub imagegen_base_url: String,
    /// LaTeX render service (returns PNG bytes).
    #[serde(default)]
    pub latex_base_url: String,
    /// Speech-to-text endpoint.
    #[serde(default)]
    pub speech_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools whose results are billed; the pre-check gates exactly these names.
    #[serde(default = "default_paid_tools")]
    pub paid_tools: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            paid_tools: default_paid_tools(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_parse_mode() -> String {
    "MarkdownV2".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_db_path() -> String {
    "quill.db".to_string()
}

fn default_max_concurrent() -> usize {
    5
}

fn default_queue_timeout() -> f64 {
    30.0
}

fn default_stars_rate() -> f64 {
    0.013
}

fn default_withdrawal_fee() -> f64 {
    0.35
}

fn default_topics_fee() -> f64 {
    0.15
}

fn default_refund_days() -> i64 {
    7
}

fn default_cost_cap() -> f64 {
    2.0
}

fn default_router_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_router_max_tokens() -> u32 {
    256
}

fn default_min_gap_minutes() -> i64 {
    30
}

fn default_recent_topics() -> usize {
    8
}

fn default_recent_messages() -> usize {
    5
}

fn default_msg_truncate() -> usize {
    200
}

fn default_topic_name_len() -> usize {
    64
}

fn default_files_ttl_hours() -> i64 {
    24
}

fn default_exec_ttl() -> u64 {
    30 * 60
}

fn default_exec_max_size() -> usize {
    10 * 1024 * 1024
}

fn default_bytes_ttl() -> u64 {
    10 * 60
}

fn default_bytes_cap() -> usize {
    128
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    10.0
}

fn default_max_iterations() -> usize {
    8
}

fn default_paid_tools() -> Vec<String> {
    [
        "analyze_image",
        "analyze_pdf",
        "transcribe_audio",
        "execute_python",
        "generate_image",
        "web_search",
        "web_fetch",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = QuillConfig::default();
        assert_eq!(cfg.limits.max_concurrent_generations_per_user, 5);
        assert_eq!(cfg.billing.minimum_balance_for_request, 0.0);
        assert!(cfg.billing.tool_cost_precheck_enabled);
        assert_eq!(cfg.billing.telegram_withdrawal_fee, 0.35);
        assert_eq!(cfg.billing.telegram_topics_fee, 0.15);
        assert_eq!(cfg.files.exec_file_ttl_secs, 1800);
        assert_eq!(cfg.files.exec_file_max_size, 10 * 1024 * 1024);
        assert_eq!(cfg.tools.max_iterations, 8);
    }

    #[test]
    fn paid_tools_default_excludes_free_tools() {
        let cfg = ToolsConfig::default();
        assert!(cfg.paid_tools.contains(&"generate_image".to_string()));
        assert!(!cfg.paid_tools.contains(&"render_latex".to_string()));
        assert!(!cfg.paid_tools.contains(&"deliver_file".to_string()));
    }
}
