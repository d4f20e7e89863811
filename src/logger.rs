use crate::config::{LoggerConfig, LoggerConfigPatch};
use crate::console::{self, CONSOLE_TARGET};
use crate::record::{
    ApiCallContext, LogBatch, LogContext, LogLevel, LogRecord, PerformanceContext,
    SecurityContext, UserActionContext,
};
use crate::sink::{LogSink, SinkError};
use chrono::Utc;
use serde_json::{Map, Value};
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

/// First retry delay of the flush task after a failed send.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// User agent reported when the host never set one.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Environment snapshot copied into every record at creation time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientEnvironment {
    pub user_agent: Option<String>,
    pub url: Option<String>,
}

/// Counters exposed by [`Logger::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Records that passed the level filter.
    pub accepted: u64,
    /// Records dropped by the level filter.
    pub filtered: u64,
    /// Records delivered by successful flushes.
    pub flushed: u64,
    /// Flushes whose batch was re-queued after a sink failure.
    pub failed_flushes: u64,
}

struct Shared {
    session_id: String,
    config: RwLock<LoggerConfig>,
    buffer: Mutex<Vec<LogRecord>>,
    // Held across snapshot, send and re-queue so batches go back in order.
    flush_lock: tokio::sync::Mutex<()>,
    sink: RwLock<Arc<dyn LogSink>>,
    user_id: RwLock<Option<String>>,
    environment: RwLock<ClientEnvironment>,
    wake: Arc<Notify>,
    accepted: AtomicU64,
    filtered: AtomicU64,
    flushed: AtomicU64,
    failed_flushes: AtomicU64,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Buffered structured logger.
///
/// Records are kept in memory and shipped to a [`LogSink`] in batches,
/// either when the buffer reaches `max_buffer_size` or when the periodic
/// flush fires. A failed flush puts its batch back in front of the buffer,
/// so nothing is lost to transient sink errors.
///
/// `Logger` is a cheap handle; clones share the same buffer, session and
/// configuration.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
}

/// Non-owning handle to a [`Logger`]; doesn't keep the flush task alive.
#[derive(Clone)]
pub struct WeakLogger {
    shared: Weak<Shared>,
}

impl WeakLogger {
    pub fn upgrade(&self) -> Option<Logger> {
        self.shared.upgrade().map(|shared| Logger { shared })
    }
}

impl Logger {
    /// Create a logger and spawn the background task that flushes it.
    ///
    /// The task wakes every `flush_interval` (re-read on each iteration, so
    /// [`set_config`](Self::set_config) takes effect) and whenever a logging
    /// call fills the buffer. After a failed send it retries on its own
    /// schedule, starting at 100 ms and doubling up to 10 s; size triggers
    /// during that wait don't cause extra sends. It exits once every
    /// `Logger` handle has been dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(sink: Arc<dyn LogSink>, config: LoggerConfig) -> (Self, JoinHandle<()>) {
        let wake = Arc::new(Notify::new());
        let shared = Arc::new(Shared {
            session_id: generate_session_id(),
            config: RwLock::new(config.normalized()),
            buffer: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            sink: RwLock::new(sink),
            user_id: RwLock::new(None),
            environment: RwLock::new(ClientEnvironment {
                user_agent: Some(DEFAULT_USER_AGENT.to_string()),
                url: None,
            }),
            wake: Arc::clone(&wake),
            accepted: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
        });

        let handle = tokio::spawn(flush_loop(Arc::downgrade(&shared), wake));
        (Self { shared }, handle)
    }

    /// Create a logger whose sink is built from `config.remote_endpoint`.
    pub fn from_config(
        config: LoggerConfig,
    ) -> Result<(Self, JoinHandle<()>), crate::backend::EndpointError> {
        let sink = crate::backend::make_sink(&config.remote_endpoint)?;
        Ok(Self::new(sink, config))
    }

    /// Create a logger configured from the `LOG_*` environment variables.
    pub fn from_env() -> Result<(Self, JoinHandle<()>), crate::backend::EndpointError> {
        Self::from_config(LoggerConfig::from_env())
    }

    pub fn downgrade(&self) -> WeakLogger {
        WeakLogger { shared: Arc::downgrade(&self.shared) }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Current configuration (copy).
    pub fn config(&self) -> LoggerConfig {
        self.shared
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `patch` into the configuration. Already buffered records are
    /// not re-filtered.
    ///
    /// A new `remote_endpoint` is recorded but does not rebind the sink;
    /// use [`set_sink`](Self::set_sink) for that.
    pub fn set_config(&self, patch: LoggerConfigPatch) {
        self.shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(patch);
    }

    pub fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.shared.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        *self.shared.user_id.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.into());
    }

    pub fn clear_user_id(&self) {
        *self.shared.user_id.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn set_environment(&self, environment: ClientEnvironment) {
        *self.shared.environment.write().unwrap_or_else(PoisonError::into_inner) = environment;
    }

    /// Update the current page URL recorded on new records.
    pub fn set_url(&self, url: impl Into<String>) {
        self.shared
            .environment
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .url = Some(url.into());
    }

    /// Record one event.
    ///
    /// Records below the configured level are dropped. Accepted records are
    /// mirrored to the console when enabled and buffered when remote
    /// shipping is enabled; a buffer at or above `max_buffer_size` wakes the
    /// flush task without waiting for the next interval.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: Option<LogContext>) {
        let (min_level, enable_console, enable_remote, max_buffer_size) = {
            let config = self.shared.config.read().unwrap_or_else(PoisonError::into_inner);
            (config.level, config.enable_console, config.enable_remote, config.max_buffer_size)
        };

        if level < min_level {
            self.shared.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.accepted.fetch_add(1, Ordering::Relaxed);

        let record = self.make_record(level, message.into(), context);

        if enable_console {
            console::mirror(&record);
        }

        if enable_remote {
            let len = {
                let mut buffer = self.shared.buffer();
                buffer.push(record);
                buffer.len()
            };
            if len >= max_buffer_size {
                self.shared.wake.notify_one();
            }
        }
    }

    fn make_record(&self, level: LogLevel, message: String, context: Option<LogContext>) -> LogRecord {
        let environment = self
            .shared
            .environment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let user_id = self
            .shared
            .user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        LogRecord {
            timestamp: Utc::now(),
            level,
            message,
            context,
            session_id: self.shared.session_id.clone(),
            user_id,
            user_agent: environment.user_agent,
            url: environment.url,
            stack: (level >= LogLevel::Error).then(|| Backtrace::force_capture().to_string()),
        }
    }

    pub fn debug(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Debug, message, context)
    }

    pub fn info(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Info, message, context)
    }

    pub fn warn(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Warn, message, context)
    }

    pub fn error(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Error, message, context)
    }

    pub fn fatal(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Fatal, message, context)
    }

    pub fn user_action(&self, action: impl Into<String>, details: Map<String, Value>) {
        let action = action.into();
        self.info(
            format!("User Action: {action}"),
            Some(LogContext::UserAction(UserActionContext { action, details })),
        )
    }

    /// Record an HTTP call. Logged at `ERROR` when the status is 400 or
    /// above, or when the call failed before producing a status.
    pub fn api_call(
        &self,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status: u16,
        duration_ms: f64,
        error: Option<String>,
    ) {
        let endpoint = endpoint.into();
        let method = method.into();
        let level = if status >= 400 || error.is_some() {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        self.log(
            level,
            format!("API Call: {method} {endpoint}"),
            Some(LogContext::ApiCall(ApiCallContext {
                endpoint,
                method,
                status,
                duration: duration_ms,
                error,
            })),
        )
    }

    pub fn performance(&self, metric: impl Into<String>, value: f64, unit: impl Into<String>) {
        let metric = metric.into();
        self.info(
            format!("Performance: {metric}"),
            Some(LogContext::Performance(PerformanceContext {
                metric,
                value,
                unit: unit.into(),
            })),
        )
    }

    /// Security events are always logged at `WARN`.
    pub fn security(&self, event: impl Into<String>, details: Map<String, Value>) {
        let event = event.into();
        self.warn(
            format!("Security Event: {event}"),
            Some(LogContext::Security(SecurityContext { event, details })),
        )
    }

    /// Ship the current buffer to the sink.
    ///
    /// The buffer is taken before the send, so records logged while the send
    /// is in flight start a new batch. On failure the taken batch is put back
    /// in front of them, preserving call order, and the error is reported on
    /// the console only. Concurrent flushes run one at a time.
    ///
    /// **Returns**
    /// - `Ok(n)` with the number of delivered records (`0` when remote
    ///   shipping is disabled or nothing was buffered; the sink isn't called).
    /// - `Err(..)` with the sink error after re-queuing.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        if !self.config().enable_remote {
            return Ok(0);
        }

        let _serial = self.shared.flush_lock.lock().await;
        let logs = {
            let mut buffer = self.shared.buffer();
            if buffer.is_empty() {
                return Ok(0);
            }
            std::mem::take(&mut *buffer)
        };

        let batch = LogBatch {
            logs,
            session_id: self.shared.session_id.clone(),
            timestamp: Utc::now(),
        };
        let sink = Arc::clone(&*self.shared.sink.read().unwrap_or_else(PoisonError::into_inner));

        match sink.send(&batch).await {
            Ok(()) => {
                let sent = batch.logs.len();
                self.shared.flushed.fetch_add(sent as u64, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.shared.failed_flushes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: CONSOLE_TARGET,
                    error = %e,
                    records = batch.logs.len(),
                    "failed to send logs to server"
                );
                let mut buffer = self.shared.buffer();
                let newer = std::mem::replace(&mut *buffer, batch.logs);
                buffer.extend(newer);
                Err(e)
            }
        }
    }

    /// Flush now and wait for the result.
    pub async fn force_flush(&self) -> Result<usize, SinkError> {
        self.flush().await
    }

    /// Copy of the records currently waiting to be flushed.
    pub fn buffer(&self) -> Vec<LogRecord> {
        self.shared.buffer().clone()
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.buffer().len()
    }

    pub fn clear_buffer(&self) {
        self.shared.buffer().clear();
    }

    pub fn stats(&self) -> LoggerStats {
        LoggerStats {
            accepted: self.shared.accepted.load(Ordering::Relaxed),
            filtered: self.shared.filtered.load(Ordering::Relaxed),
            flushed: self.shared.flushed.load(Ordering::Relaxed),
            failed_flushes: self.shared.failed_flushes.load(Ordering::Relaxed),
        }
    }
}

async fn flush_loop(shared: Weak<Shared>, wake: Arc<Notify>) {
    let mut backoff = INITIAL_BACKOFF;
    let mut retrying = false;
    loop {
        if !retrying {
            let interval = match shared.upgrade() {
                Some(shared) => {
                    shared
                        .config
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .flush_interval
                }
                None => return,
            };

            tokio::select! {
                _ = sleep(interval) => {}
                _ = wake.notified() => {}
            }
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        // Failures are re-queued and reported inside `flush`. Size triggers
        // that arrive while backing off collapse into the next retry.
        match (Logger { shared }).flush().await {
            Ok(_) => {
                backoff = INITIAL_BACKOFF;
                retrying = false;
            }
            Err(_) => {
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                retrying = true;
            }
        }
    }
}

fn generate_session_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &random[..9])
}
