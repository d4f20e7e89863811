use crate::record::LogBatch;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;

/// A sink that simply drops all batches.
///
/// Useful for measuring the overhead of the logger itself without any
/// network I/O, and as the target of `noop://` endpoints.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _batch: &LogBatch) -> Result<(), SinkError> {
        Ok(())
    }
}
