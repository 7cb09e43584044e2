use thiserror::Error;

/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Serialization
    // =========
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    // =========
    // Source database
    // =========
    #[error("source database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("source query for feed type {feed_type} returned no rows")]
    NoRecords { feed_type: String },

    // =========
    // State store
    // =========
    #[error("state store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("generation {id} has an unparseable stored timestamp")]
    InvalidTimestamp { id: String },

    #[error("generation {id} not found in store")]
    GenerationNotFound { id: String },

    // =========
    // Shard writer
    // =========
    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error(
        "record of {record_len} bytes cannot fit within a shard (size_limit={size_limit}, line_limit={line_limit})"
    )]
    RecordOverflowsLimits {
        record_len: usize,
        size_limit: usize,
        line_limit: usize,
    },

    // =========
    // Uploader (FTP)
    // =========
    #[error("FTP transport error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    // =========
    // Feed-type registry
    // =========
    #[error("unknown feed type: {0}")]
    UnknownFeedType(String),

    // =========
    // Scheduler
    // =========
    #[error("scheduled task not found: {0}")]
    TaskNotFound(String),

    #[error("scheduled task already exists: {0}")]
    TaskAlreadyExists(String),

    #[error("cron dispatcher error: {0}")]
    CronDispatcher(String),

    // =========
    // Generic / cross-cutting
    // =========
    #[error("generation {id} was canceled")]
    Canceled { id: String },

    #[error("failed to join background task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("internal error: {0}")]
    Internal(String),
}
