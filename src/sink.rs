use crate::record::LogBatch;
use async_trait::async_trait;

/// Error type returned by [`LogSink`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("sink rejected batch with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Transport(err.to_string())
    }
}

/// Asynchronous destination for [`LogBatch`]es flushed by the [`Logger`].
///
/// Implementations are responsible for transporting a batch to a concrete
/// backend (the ingestion endpoint, a file, stdout, etc). The logger calls
/// `send` from its flush task or from an explicit `flush().await`, never
/// from inside a logging call.
///
/// [`Logger`]: crate::logger::Logger
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver one batch to the backend.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the whole batch.
    /// - `Err(..)` on any transport, status or encoding failure. The logger
    ///   treats this as transient and re-queues the batch in front of the
    ///   buffer for the next flush.
    async fn send(&self, batch: &LogBatch) -> Result<(), SinkError>;
}
