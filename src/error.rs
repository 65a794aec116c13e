//! Crate-wide error and result types.

/// Errors produced while bridging a request to the chat transport.
///
/// The `Display` text of each variant is what HTTP callers see in the
/// `error` field of the response body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport connection has not finished coming up.
    #[error("Discord is not ready yet")]
    NotReady,

    /// Caller input was rejected. The text is returned to the caller as-is.
    #[error("{0}")]
    Validation(String),

    /// The conversation has no channel behind it.
    #[error("Conversation does not exist")]
    NotFound,

    /// A transport API call failed.
    #[error("Discord request failed: {0}")]
    Transport(anyhow::Error),

    /// No reply arrived within the configured wait.
    #[error("Timed out waiting for a response")]
    ReplyTimeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
