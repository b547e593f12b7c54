use thiserror::Error;

/// Cross-crate error taxonomy.
///
/// Domain failures that a user can see carry enough context to render a
/// localized message; programming errors (`InvalidAmount`, `InvalidCommission`)
/// are raised immediately and never shown verbatim.
#[derive(Debug, Error)]
pub enum QuillError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("User not found: {id}")]
    UserNotFound { id: i64 },

    #[error("Thread not found: {id}")]
    ThreadNotFound { id: i64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Insufficient balance: {balance_usd} USD")]
    InsufficientBalance { balance_usd: String },

    #[error("Concurrency limit exceeded: position {queue_position}, waited {waited_secs:.1}s")]
    ConcurrencyLimitExceeded {
        queue_position: usize,
        waited_secs: f64,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid commission rates: {0}")]
    InvalidCommission(String),

    #[error("Duplicate payment: charge id {charge_id}")]
    DuplicatePayment { charge_id: String },

    #[error("Refund window expired ({days} days)")]
    RefundWindowExpired { days: i64 },

    #[error("Payment not found: {charge_id}")]
    PaymentNotFound { charge_id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    /// Transient external failure (5xx, connection, 429) after retries.
    #[error("External service error ({service}): {message}")]
    ExternalTransient { service: String, message: String },

    /// Permanent external failure (4xx except 429, content policy).
    #[error("External service rejected request ({service}): {message}")]
    ExternalPermanent { service: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuillError {
    /// Short error code for structured logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            QuillError::Config(_) => "CONFIG_ERROR",
            QuillError::UserNotFound { .. } => "USER_NOT_FOUND",
            QuillError::ThreadNotFound { .. } => "THREAD_NOT_FOUND",
            QuillError::FileNotFound(_) => "FILE_NOT_FOUND",
            QuillError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            QuillError::ConcurrencyLimitExceeded { .. } => "CONCURRENCY_LIMIT",
            QuillError::InvalidAmount(_) => "INVALID_AMOUNT",
            QuillError::InvalidCommission(_) => "INVALID_COMMISSION",
            QuillError::DuplicatePayment { .. } => "DUPLICATE_PAYMENT",
            QuillError::RefundWindowExpired { .. } => "REFUND_WINDOW_EXPIRED",
            QuillError::PaymentNotFound { .. } => "PAYMENT_NOT_FOUND",
            QuillError::Database(_) => "DATABASE_ERROR",
            QuillError::Cache(_) => "CACHE_ERROR",
            QuillError::ExternalTransient { .. } => "EXTERNAL_TRANSIENT",
            QuillError::ExternalPermanent { .. } => "EXTERNAL_PERMANENT",
            QuillError::Cancelled => "CANCELLED",
            QuillError::Serialization(_) => "SERIALIZATION_ERROR",
            QuillError::Io(_) => "IO_ERROR",
            QuillError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuillError::ExternalTransient { .. })
    }
}

pub type Result<T> = std::result::Result<T, QuillError>;
