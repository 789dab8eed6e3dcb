use thiserror::Error;

#[derive(Debug, Error)]
pub enum RvmError {
    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("bundle not found: {0}")]
    NotFound(String),

    #[error("access denied for account {account}: {reason}")]
    AccessDenied { account: String, reason: String },

    #[error("unauthorized in account {account}: {reason}")]
    Unauthorized { account: String, reason: String },

    #[error("transient failure: {0}")]
    Unavailable(String),

    #[error("stack operation failed: {0}")]
    StackOperationFailed(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("invalid account id '{0}': must be a 12-digit string")]
    InvalidAccountId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RvmError {
    /// Whether a bounded retry with backoff may clear this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RvmError::Unavailable(_))
    }

    /// Whether this error aborts the whole run rather than one account.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RvmError::MalformedBundle(_) | RvmError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RvmError>;
