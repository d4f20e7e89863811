use crate::record::LogBatch;
use crate::sink::{LogSink, SinkError};
use async_trait::async_trait;
use reqwest::Client;

/// [`LogSink`] that POSTs each batch as JSON to the ingestion endpoint.
///
/// Uses a plain `reqwest` client rather than an instrumented one, so
/// flushes never produce `api_call` records of their own.
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    /// Construct a new sink posting to `endpoint`.
    ///
    /// **Parameters**
    /// - `endpoint`: absolute URL of the ingestion route, e.g.
    ///   `http://127.0.0.1:3000/api/logs`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into() }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LogSink for HttpSink {
    async fn send(&self, batch: &LogBatch) -> Result<(), SinkError> {
        let resp = self.client.post(&self.endpoint).json(batch).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(SinkError::Status { status, body })
        }
    }
}
