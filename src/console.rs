//! Local console mirror for accepted log records.
//!
//! Records are re-emitted as `tracing` events on [`CONSOLE_TARGET`], so
//! whatever subscriber the host installed (usually the `fmt` layer set up by
//! [`init_tracing`](crate::init::init_tracing)) decides how they are printed.

use crate::record::{LogLevel, LogRecord};

/// Target of every console-mirrored event.
pub const CONSOLE_TARGET: &str = "web_telemetry::console";

/// Prefix of all targets owned by this crate. The tracing bridge ignores
/// them so mirrored records are never fed back into the buffer.
pub const CRATE_TARGET_PREFIX: &str = "web_telemetry";

pub(crate) fn mirror(record: &LogRecord) {
    let prefix = format!(
        "[{}] [{}]",
        record.timestamp.format("%H:%M:%S"),
        record.level.as_str()
    );
    let context = record
        .context
        .as_ref()
        .and_then(|c| serde_json::to_string(c).ok());

    match (record.level, context) {
        (LogLevel::Error | LogLevel::Fatal, Some(ctx)) => {
            tracing::error!(target: CONSOLE_TARGET, context = %ctx, "{} {}", prefix, record.message)
        }
        (LogLevel::Error | LogLevel::Fatal, None) => {
            tracing::error!(target: CONSOLE_TARGET, "{} {}", prefix, record.message)
        }
        (LogLevel::Warn, Some(ctx)) => {
            tracing::warn!(target: CONSOLE_TARGET, context = %ctx, "{} {}", prefix, record.message)
        }
        (LogLevel::Warn, None) => {
            tracing::warn!(target: CONSOLE_TARGET, "{} {}", prefix, record.message)
        }
        (LogLevel::Info, Some(ctx)) => {
            tracing::info!(target: CONSOLE_TARGET, context = %ctx, "{} {}", prefix, record.message)
        }
        (LogLevel::Info, None) => {
            tracing::info!(target: CONSOLE_TARGET, "{} {}", prefix, record.message)
        }
        (LogLevel::Debug, Some(ctx)) => {
            tracing::debug!(target: CONSOLE_TARGET, context = %ctx, "{} {}", prefix, record.message)
        }
        (LogLevel::Debug, None) => {
            tracing::debug!(target: CONSOLE_TARGET, "{} {}", prefix, record.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggerConfig;
    use crate::logger::Logger;
    use crate::noop_sink::NoopSink;
    use crate::record::{LogContext, PerformanceContext};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::Registry;

    #[derive(Debug, Clone)]
    struct Mirrored {
        level: Level,
        message: String,
        context: Option<String>,
    }

    #[derive(Clone, Default)]
    struct ConsoleCapture(Arc<Mutex<Vec<Mirrored>>>);

    struct CaptureVisitor<'a>(&'a mut Mirrored);

    impl Visit for CaptureVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            match field.name() {
                "message" => self.0.message = format!("{value:?}"),
                "context" => self.0.context = Some(format!("{value:?}")),
                _ => {}
            }
        }
    }

    impl<S: Subscriber> Layer<S> for ConsoleCapture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() != CONSOLE_TARGET {
                return;
            }
            let mut mirrored = Mirrored {
                level: *event.metadata().level(),
                message: String::new(),
                context: None,
            };
            event.record(&mut CaptureVisitor(&mut mirrored));
            self.0.lock().unwrap().push(mirrored);
        }
    }

    fn has_clock_prefix(message: &str) -> bool {
        let bytes = message.as_bytes();
        bytes.len() > 11
            && bytes[0] == b'['
            && bytes[3] == b':'
            && bytes[6] == b':'
            && bytes[9] == b']'
            && [1, 2, 4, 5, 7, 8].iter().all(|&i| bytes[i].is_ascii_digit())
    }

    #[tokio::test]
    async fn filtered_levels_never_reach_console() {
        let config = LoggerConfig {
            level: LogLevel::Warn,
            flush_interval: Duration::from_secs(3600),
            ..LoggerConfig::default()
        };
        let (logger, _task) = Logger::new(Arc::new(NoopSink), config);
        let capture = ConsoleCapture::default();
        let subscriber = Registry::default().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            logger.debug("cache miss", None);
            logger.info("compose opened", None);
            logger.warn("quota low", None);
            logger.fatal(
                "renderer crashed",
                Some(LogContext::Performance(PerformanceContext {
                    metric: "api_response_time".into(),
                    value: 12.0,
                    unit: "ms".into(),
                })),
            );
        });

        let mirrored = capture.0.lock().unwrap().clone();
        assert_eq!(mirrored.len(), 2);

        assert_eq!(mirrored[0].level, Level::WARN);
        assert!(has_clock_prefix(&mirrored[0].message), "{}", mirrored[0].message);
        assert_eq!(&mirrored[0].message[10..], " [WARN] quota low");
        assert!(mirrored[0].context.is_none());

        assert_eq!(mirrored[1].level, Level::ERROR);
        assert!(has_clock_prefix(&mirrored[1].message), "{}", mirrored[1].message);
        assert_eq!(&mirrored[1].message[10..], " [FATAL] renderer crashed");
        assert!(mirrored[1].context.as_deref().unwrap().contains("\"type\":\"performance\""));
    }

    #[tokio::test]
    async fn console_disabled_mirrors_nothing() {
        let config = LoggerConfig {
            enable_console: false,
            flush_interval: Duration::from_secs(3600),
            ..LoggerConfig::default()
        };
        let (logger, _task) = Logger::new(Arc::new(NoopSink), config);
        let capture = ConsoleCapture::default();
        let subscriber = Registry::default().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || logger.error("boom", None));

        assert!(capture.0.lock().unwrap().is_empty());
        assert_eq!(logger.buffered_len(), 1);
    }
}
