//! Error types for the sync client.

/// Failure of a pull or push attempt.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No credential, or the server refused it. Not retried automatically.
    #[error("Not signed in: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server responded {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Undecodable response: {0}")]
    Decode(String),

    /// A local record that cannot be written as a wire row.
    #[error("Invalid local record: {0}")]
    Record(#[from] shelfsync_engine::Error),

    #[error("Invalid sync endpoint: {0}")]
    Endpoint(String),

    #[error(transparent)]
    Local(#[from] LocalError),
}

impl SyncError {
    /// Whether the user has to sign in before syncing again.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

/// Failure of a local collaborator (persistence or content download).
#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Content download failed for {book}: {reason}")]
    Fetch { book: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
