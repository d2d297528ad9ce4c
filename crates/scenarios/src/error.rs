use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("scenario not found: {0}")]
    NotFound(String),

    #[error("a scenario with id {0} already exists")]
    DuplicateId(String),

    #[error("failed to serialize scenarios: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Rejected import; nothing was merged
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to import scenarios: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "Invalid file format. The file must contain a valid scenario object or an array of scenarios. (entry {index}: {reason})"
    )]
    Invalid { index: usize, reason: String },
}

/// Failure of the durable medium
#[derive(Debug, Error)]
pub enum MediumError {
    #[error("storage quota exceeded: {needed} bytes needed, {limit} available")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
