use thiserror::Error;

/// Failure classes for the sync core. Every remote or scheduling failure is
/// caught at the operation boundary and shown to clients as a single error
/// string; nothing here aborts the process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure talking to the catalog service.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The call reached the service but the service reported failure
    /// (bad credential, unknown list, `success: false`, ...).
    #[error("catalog error: {0}")]
    Remote(String),

    /// A trigger could not be armed: unparseable release date or the
    /// scheduler rejected the request.
    #[error("scheduling failed: {0}")]
    Schedule(String),
}

impl SyncError {
    pub fn remote(msg: impl Into<String>) -> Self {
        SyncError::Remote(msg.into())
    }
}
