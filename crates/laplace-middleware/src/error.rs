use laplace_transport::ReplyChannelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MiddlewareError {
    /// Startup configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The transport could not bind its endpoint.
    #[error("failed to bind {address}: {reason}")]
    BindFailure { address: String, reason: String },
    /// A send or receive failed after the transport was bound.
    #[error("transport failure: {source}")]
    TransportFailure {
        source: Box<dyn std::error::Error + Send + Sync>,
        cancelled: bool,
    },
    #[error("snapshot encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MiddlewareError {
    pub(crate) fn transport<E: ReplyChannelError>(err: E) -> Self {
        let cancelled = err.is_cancelled();
        Self::TransportFailure {
            source: Box::new(err),
            cancelled,
        }
    }

    /// Whether retrying `publish` can make progress.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    /// Whether the failure was a cancelled receive.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure {
                cancelled: true,
                ..
            }
        )
    }
}
