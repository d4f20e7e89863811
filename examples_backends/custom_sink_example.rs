use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use web_telemetry::config::LoggerConfig;
use web_telemetry::record::LogBatch;
use web_telemetry::sink::{LogSink, SinkError};
use web_telemetry::Logger;

/// Delivers batches somewhere this crate has no built-in sink for. Here it
/// just prints them as JSON lines.
struct StdoutJsonSink;

#[async_trait]
impl LogSink for StdoutJsonSink {
    async fn send(&self, batch: &LogBatch) -> Result<(), SinkError> {
        for record in &batch.logs {
            println!("{}", serde_json::to_string(record)?);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (logger, _flusher) = Logger::new(Arc::new(StdoutJsonSink), LoggerConfig::default());
    logger.set_user_id("user-42");

    let mut details = Map::new();
    details.insert("button".into(), json!("generate"));
    logger.user_action("click", details);
    logger.performance("api_response_time", 320.0, "ms");
    logger.error("draft generation failed", None);

    logger.flush().await?;
    Ok(())
}
