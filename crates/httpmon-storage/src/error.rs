/// Errors that can occur within the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A required record was not found in the database.
    #[error("Store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A write was rejected by configuration validation.
    #[error("Store: invalid {entity}: {reason}")]
    Invalid {
        entity: &'static str,
        reason: String,
    },

    /// The operation conflicts with existing state (duplicate name,
    /// credential still referenced by endpoints, ...).
    #[error("Store: conflict: {0}")]
    Conflict(String),

    /// An insert succeeded but the row could not be read back, which should
    /// be unreachable under normal conditions.
    #[error("Store: insert of {entity} succeeded but the row could not be read back")]
    InsertReadback { entity: &'static str },

    /// An underlying SQLite error.
    #[error("Store: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (header maps).
    #[error("Store: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sealing or opening credential material failed.
    #[error("Store: crypto error: {0}")]
    Crypto(#[from] httpmon_secret::CryptoError),

    /// Filesystem error while opening the database.
    #[error("Store: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
