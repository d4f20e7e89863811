//! Ambient instrumentation.
//!
//! Two opt-in interceptors that turn process-wide signals into log records
//! without per-call-site logging:
//!
//! - [`ApiInterceptor`] (and [`InstrumentedClient`] with the `http` feature)
//!   wraps outgoing HTTP calls and records one `api_call` entry per call.
//! - [`ErrorInterceptor`] turns uncaught errors, unhandled task failures and
//!   failed resource loads into `ERROR` records.

use crate::logger::Logger;
use crate::record::LogContext;
use serde_json::{json, Map, Value};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;

/// Anything that carries an HTTP status code.
pub trait HttpOutcome {
    fn status_code(&self) -> u16;
}

#[cfg(feature = "http")]
impl HttpOutcome for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

/// Times HTTP calls and records them through [`Logger::api_call`].
#[derive(Clone)]
pub struct ApiInterceptor {
    logger: Logger,
}

impl ApiInterceptor {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Await `call`, record exactly one `api_call` entry and hand back the
    /// call's own result untouched.
    ///
    /// A failed call is recorded with status `0` and the error text.
    pub async fn track<F, T, E>(&self, endpoint: &str, method: &str, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        T: HttpOutcome,
        E: Display,
    {
        let started = Instant::now();
        let result = call.await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(response) => {
                self.logger
                    .api_call(endpoint, method, response.status_code(), duration_ms, None)
            }
            Err(e) => self
                .logger
                .api_call(endpoint, method, 0, duration_ms, Some(e.to_string())),
        }
        result
    }
}

/// `reqwest::Client` decorator that records every request it executes.
#[cfg(feature = "http")]
#[derive(Clone)]
pub struct InstrumentedClient {
    inner: reqwest::Client,
    interceptor: ApiInterceptor,
}

#[cfg(feature = "http")]
impl InstrumentedClient {
    pub fn new(inner: reqwest::Client, logger: Logger) -> Self {
        Self { inner, interceptor: ApiInterceptor::new(logger) }
    }

    /// Underlying client, for building requests.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    pub async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let endpoint = request.url().to_string();
        let method = request.method().to_string();
        self.interceptor
            .track(&endpoint, &method, self.inner.execute(request))
            .await
    }

    /// Build `builder` and execute it. Build failures are returned without
    /// a log record since no request was made.
    pub async fn send(&self, builder: reqwest::RequestBuilder) -> reqwest::Result<reqwest::Response> {
        self.execute(builder.build()?).await
    }
}

/// Ambient error signals, one per kind of process-wide failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSignal {
    /// Uncaught error (a panic, or a host-reported script error).
    Script {
        message: String,
        filename: Option<String>,
        lineno: Option<u32>,
        colno: Option<u32>,
        stack: Option<String>,
    },
    /// A background task failed and nobody awaited its result.
    UnhandledRejection { reason: String },
    /// A sub-resource (image, script, stylesheet, ...) failed to load.
    ResourceLoad { target: String, kind: String },
}

impl ErrorSignal {
    fn into_entry(self) -> (&'static str, Map<String, Value>) {
        let (message, fields) = match self {
            ErrorSignal::Script { message, filename, lineno, colno, stack } => (
                "Uncaught Error",
                json!({
                    "message": message,
                    "filename": filename,
                    "lineno": lineno,
                    "colno": colno,
                    "error": stack,
                }),
            ),
            ErrorSignal::UnhandledRejection { reason } => {
                ("Unhandled Rejection", json!({ "reason": reason }))
            }
            ErrorSignal::ResourceLoad { target, kind } => {
                ("Resource Loading Error", json!({ "target": target, "type": kind }))
            }
        };
        (message, to_map(fields))
    }
}

fn to_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Records ambient error signals as `ERROR` entries.
#[derive(Clone)]
pub struct ErrorInterceptor {
    logger: Logger,
}

impl ErrorInterceptor {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Record one signal.
    pub fn report(&self, signal: ErrorSignal) {
        let (message, fields) = signal.into_entry();
        self.logger.error(message, Some(LogContext::Generic(fields)));
    }

    /// Install a panic hook that records panics before delegating to the
    /// previously installed hook.
    ///
    /// Only the first call per process installs anything; later calls
    /// return `false`. The hook holds the logger weakly: once every
    /// `Logger` handle is gone, panics are only passed on.
    pub fn install_panic_hook(&self) -> bool {
        if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
            return false;
        }

        let logger = self.logger.downgrade();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            if let Some(logger) = logger.upgrade() {
                let location = info.location();
                ErrorInterceptor::new(logger).report(ErrorSignal::Script {
                    message,
                    filename: location.map(|l| l.file().to_string()),
                    lineno: location.map(|l| l.line()),
                    colno: location.map(|l| l.column()),
                    stack: None,
                });
            }
            previous(info);
        }));
        true
    }

    /// Spawn a fallible task whose failure is recorded as an unhandled
    /// rejection. Resolves to `Some(value)` on success, `None` on error or
    /// panic.
    ///
    /// A panic is left to the panic hook when one was installed with
    /// [`install_panic_hook`](Self::install_panic_hook), so it is recorded
    /// once, as `Uncaught Error`.
    pub fn spawn_monitored<F, T, E>(&self, task: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let interceptor = self.clone();
        let inner = tokio::spawn(task);
        tokio::spawn(async move {
            let reason = match inner.await {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(e)) => e.to_string(),
                Err(join_err)
                    if join_err.is_panic() && PANIC_HOOK_INSTALLED.load(Ordering::SeqCst) =>
                {
                    return None
                }
                Err(join_err) => join_err.to_string(),
            };
            interceptor.report(ErrorSignal::UnhandledRejection { reason });
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggerConfig;
    use crate::noop_sink::NoopSink;
    use crate::record::{ApiCallContext, LogLevel};
    use std::sync::Arc;
    use std::time::Duration;

    struct Status(u16);

    impl HttpOutcome for Status {
        fn status_code(&self) -> u16 {
            self.0
        }
    }

    fn logger() -> Logger {
        let config = LoggerConfig {
            enable_console: false,
            flush_interval: Duration::from_secs(3600),
            ..LoggerConfig::default()
        };
        Logger::new(Arc::new(NoopSink), config).0
    }

    #[tokio::test]
    async fn track_passes_result_through_and_records_call() {
        let logger = logger();
        let interceptor = ApiInterceptor::new(logger.clone());

        let ok: Result<Status, String> = interceptor
            .track("/api/generate", "POST", async { Ok(Status(201)) })
            .await;
        assert_eq!(ok.map(|s| s.0), Ok(201));

        let err: Result<Status, String> = interceptor
            .track("/api/generate", "POST", async { Err("dns failure".to_string()) })
            .await;
        assert_eq!(err.map(|s| s.0), Err("dns failure".to_string()));

        let records = logger.buffer();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Info);
        assert!(matches!(
            &records[0].context,
            Some(LogContext::ApiCall(ApiCallContext { status: 201, error: None, .. }))
        ));
        assert_eq!(records[1].level, LogLevel::Error);
        match &records[1].context {
            Some(LogContext::ApiCall(c)) => {
                assert_eq!(c.status, 0);
                assert_eq!(c.error.as_deref(), Some("dns failure"));
                assert_eq!(c.method, "POST");
            }
            other => panic!("unexpected context {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_signals_become_error_records() {
        let logger = logger();
        let interceptor = ErrorInterceptor::new(logger.clone());

        interceptor.report(ErrorSignal::Script {
            message: "undefined is not a function".into(),
            filename: Some("compose.js".into()),
            lineno: Some(12),
            colno: Some(4),
            stack: None,
        });
        interceptor.report(ErrorSignal::UnhandledRejection { reason: "timeout".into() });
        interceptor.report(ErrorSignal::ResourceLoad { target: "logo.png".into(), kind: "error".into() });

        let records = logger.buffer();
        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["Uncaught Error", "Unhandled Rejection", "Resource Loading Error"]);
        assert!(records.iter().all(|r| r.level == LogLevel::Error && r.stack.is_some()));
        match &records[0].context {
            Some(LogContext::Generic(map)) => assert_eq!(map["lineno"], 12),
            other => panic!("unexpected context {other:?}"),
        }
    }

    #[tokio::test]
    async fn monitored_task_failure_is_recorded() {
        let logger = logger();
        let interceptor = ErrorInterceptor::new(logger.clone());

        let ok = interceptor.spawn_monitored(async { Ok::<_, String>(7) });
        assert_eq!(ok.await.unwrap(), Some(7));
        assert_eq!(logger.buffered_len(), 0);

        let failed = interceptor.spawn_monitored(async { Err::<(), _>("quota exceeded") });
        assert_eq!(failed.await.unwrap(), None);

        let records = logger.buffer();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Unhandled Rejection");
    }

    fn render() -> Result<(), String> {
        panic!("template missing")
    }

    // No panic hook is installed in this test binary.
    #[tokio::test]
    async fn monitored_task_panic_without_hook_is_a_rejection() {
        let logger = logger();
        let interceptor = ErrorInterceptor::new(logger.clone());

        let panicked = interceptor.spawn_monitored(async { render() });
        assert_eq!(panicked.await.unwrap(), None);

        let records = logger.buffer();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Unhandled Rejection");
    }
}
