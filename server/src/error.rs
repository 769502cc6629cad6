use thiserror::Error;

/// Credential rejection during the connection handshake.
/// Fatal to the connection attempt, never retried; the transport is closed
/// with a descriptive reason before the connection becomes active.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential supplied with handshake")]
    MissingToken,

    /// Both verification paths failed. The federated reason is what the
    /// client sees; the local error is kept for diagnostics only and never
    /// affects control flow.
    #[error("credential rejected: {federated_reason}")]
    Rejected {
        federated_reason: String,
        local_error: Option<jsonwebtoken::errors::Error>,
    },
}

/// Failure talking to the durable message store. Fully recovered locally:
/// logged, recorded as `persisted: false` on the delivered copy, and never
/// surfaced to any client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned status {0}")]
    Status(reqwest::StatusCode),
}
