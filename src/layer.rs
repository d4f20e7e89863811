use crate::console::CRATE_TARGET_PREFIX;
use crate::logger::Logger;
use crate::record::{LogContext, LogLevel};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that forwards application events into a
/// [`Logger`], so existing `tracing::info!`/`error!` call sites end up in the
/// same buffered batches as direct logger calls.
///
/// Events below `min_level` are ignored, as are events emitted by this crate
/// itself (console mirroring, flush failures) and by the HTTP stack a flush
/// runs on, which would otherwise be fed back into the buffer they describe.
pub struct LoggerLayer {
    logger: Logger,
    min_level: Level,
}

impl LoggerLayer {
    pub fn new(logger: Logger, min_level: Level) -> Self {
        Self { logger, min_level }
    }
}

const IGNORED_TARGETS: [&str; 5] = [CRATE_TARGET_PREFIX, "reqwest", "hyper", "h2", "rustls"];

fn map_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

impl<S> Layer<S> for LoggerLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // tracing orders levels by verbosity: ERROR < WARN < ... < TRACE
        if *meta.level() > self.min_level
            || IGNORED_TARGETS.iter().any(|prefix| meta.target().starts_with(prefix))
        {
            return;
        }

        let mut fields = Map::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        fields.insert("target".to_string(), Value::String(meta.target().to_string()));
        if let Some(file) = meta.file() {
            fields.insert("file".to_string(), Value::String(file.to_string()));
        }
        if let Some(line) = meta.line() {
            fields.insert("line".to_string(), Value::from(line));
        }

        self.logger.log(
            map_level(meta.level()),
            message.unwrap_or_default(),
            Some(LogContext::Generic(fields)),
        );
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Map<String, Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggerConfig;
    use crate::noop_sink::NoopSink;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[tokio::test]
    async fn forwards_application_events_only() {
        let config = LoggerConfig {
            enable_console: false,
            flush_interval: Duration::from_secs(3600),
            ..LoggerConfig::default()
        };
        let (logger, _task) = Logger::new(Arc::new(NoopSink), config);
        let subscriber = Registry::default().with(LoggerLayer::new(logger.clone(), Level::INFO));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "draft_app::compose", draft_id = 7, "generation failed");
            tracing::debug!(target: "draft_app::compose", "too verbose");
            tracing::warn!(target: "web_telemetry::console", "mirrored record");
        });

        let records = logger.buffer();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[0].message, "generation failed");
        match &records[0].context {
            Some(LogContext::Generic(map)) => {
                assert_eq!(map["draft_id"], 7);
                assert_eq!(map["target"], "draft_app::compose");
            }
            other => panic!("unexpected context {other:?}"),
        }
    }
}
