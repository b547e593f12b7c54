use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use quill_core::Usd;

/// A user row. `id` is the external platform numeric id.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub language_code: Option<String>,
    pub model: String,
    pub custom_prompt: Option<String>,
    pub balance: Usd,
    pub created_at: String,
    pub updated_at: String,
}

/// One conversation scope: (chat_id, user_id, topic_id), topic 0 = none.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub topic_id: i64,
    pub title: Option<String>,
    pub files_context: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub thread_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub role: Role,
    pub text: Option<String>,
    pub forward_origin: Option<String>,
    pub reply_snippet: Option<String>,
    pub quote_text: Option<String>,
    pub edit_count: i64,
    pub thinking_tokens: Option<i64>,
    pub text_tokens: Option<i64>,
    pub created_at: String,
}

/// New message payload — ids are assigned by the database.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub role: Role,
    pub text: Option<String>,
    pub forward_origin: Option<String>,
    pub reply_snippet: Option<String>,
    pub quote_text: Option<String>,
    pub thinking_tokens: Option<i64>,
    pub text_tokens: Option<i64>,
}

/// Media classification stored per file and used for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Pdf,
    Audio,
    Voice,
    Video,
    VideoNote,
    Document,
    Generated,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileKind::Image => "image",
            FileKind::Pdf => "pdf",
            FileKind::Audio => "audio",
            FileKind::Voice => "voice",
            FileKind::Video => "video",
            FileKind::VideoNote => "video_note",
            FileKind::Document => "document",
            FileKind::Generated => "generated",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FileKind::Image),
            "pdf" => Ok(FileKind::Pdf),
            "audio" => Ok(FileKind::Audio),
            "voice" => Ok(FileKind::Voice),
            "video" => Ok(FileKind::Video),
            "video_note" => Ok(FileKind::VideoNote),
            "document" => Ok(FileKind::Document),
            "generated" => Ok(FileKind::Generated),
            other => Err(format!("unknown file kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    User,
    Assistant,
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::User => write!(f, "user"),
            FileSource::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for FileSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(FileSource::User),
            "assistant" => Ok(FileSource::Assistant),
            other => Err(format!("unknown file source: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserFile {
    pub id: i64,
    pub message_id: i64,
    pub thread_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_kind: FileKind,
    pub source: FileSource,
    pub claude_file_id: Option<String>,
    pub telegram_file_id: Option<String>,
    pub telegram_file_unique_id: Option<String>,
    pub uploaded_at: String,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUserFile {
    pub message_id: i64,
    pub thread_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_kind: FileKind,
    pub source: FileSource,
    pub claude_file_id: Option<String>,
    pub telegram_file_id: Option<String>,
    pub telegram_file_unique_id: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub charge_id: String,
    pub stars_amount: i64,
    pub nominal_usd: Usd,
    pub credited_usd: Usd,
    pub k1: Usd,
    pub k2: Usd,
    pub k3: Usd,
    pub status: PaymentStatus,
    pub invoice_payload: Option<String>,
    pub created_at: String,
    pub refunded_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Payment,
    Usage,
    Refund,
    AdminTopup,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Payment => write!(f, "payment"),
            OperationType::Usage => write!(f, "usage"),
            OperationType::Refund => write!(f, "refund"),
            OperationType::AdminTopup => write!(f, "admin_topup"),
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(OperationType::Payment),
            "usage" => Ok(OperationType::Usage),
            "refund" => Ok(OperationType::Refund),
            "admin_topup" => Ok(OperationType::AdminTopup),
            other => Err(format!("unknown operation type: {other}")),
        }
    }
}

/// Audit row. Invariant: balance_after = balance_before + amount.
#[derive(Debug, Clone)]
pub struct BalanceOperation {
    pub id: i64,
    pub user_id: i64,
    pub operation_type: OperationType,
    pub amount: Usd,
    pub balance_before: Usd,
    pub balance_after: Usd,
    pub related_payment_id: Option<i64>,
    pub related_message_id: Option<i64>,
    pub admin_user_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewToolCall {
    pub user_id: i64,
    pub chat_id: i64,
    pub thread_id: i64,
    pub message_id: i64,
    pub tool_name: String,
    pub model_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cost_usd: Usd,
    pub duration_ms: Option<i64>,
    pub success: bool,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
