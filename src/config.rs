use crate::env::{
    env_or, env_parse_or, DEFAULT_LOGS_PATH, LOG_ENABLE_CONSOLE_ENV, LOG_ENABLE_REMOTE_ENV,
    LOG_FLUSH_INTERVAL_MS_ENV, LOG_LEVEL_ENV, LOG_MAX_BUFFER_SIZE_ENV, LOG_SINK_ENDPOINT_ENV,
};
use crate::record::LogLevel;
use std::time::Duration;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Process-wide logger configuration.
///
/// **Fields**
/// - `level`: records below this level are dropped before reaching the
///   console or the buffer.
/// - `enable_console`: mirror every accepted record to the console sink.
/// - `enable_remote`: buffer records and flush them to the remote sink.
/// - `remote_endpoint`: where [`Logger::from_config`] ships batches.
/// - `max_buffer_size`: buffer length that triggers an immediate flush.
/// - `flush_interval`: period of the background flush.
///
/// [`Logger::from_config`]: crate::logger::Logger::from_config
#[derive(Clone, Debug, PartialEq)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub enable_console: bool,
    pub enable_remote: bool,
    pub remote_endpoint: String,
    pub max_buffer_size: usize,
    pub flush_interval: Duration,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            enable_console: true,
            enable_remote: true,
            remote_endpoint: DEFAULT_LOGS_PATH.to_string(),
            max_buffer_size: 100,
            flush_interval: Duration::from_secs(5),
        }
    }
}

impl LoggerConfig {
    /// Build a config from `LOG_*` environment variables on top of the
    /// defaults. Values that fail to parse keep their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env_parse_or(LOG_LEVEL_ENV, defaults.level),
            enable_console: env_parse_or(LOG_ENABLE_CONSOLE_ENV, defaults.enable_console),
            enable_remote: env_parse_or(LOG_ENABLE_REMOTE_ENV, defaults.enable_remote),
            remote_endpoint: env_or(LOG_SINK_ENDPOINT_ENV, &defaults.remote_endpoint),
            max_buffer_size: env_parse_or(LOG_MAX_BUFFER_SIZE_ENV, defaults.max_buffer_size),
            flush_interval: Duration::from_millis(env_parse_or(
                LOG_FLUSH_INTERVAL_MS_ENV,
                defaults.flush_interval.as_millis() as u64,
            )),
        }
        .normalized()
    }

    /// Enforce minimal thresholds to avoid degenerate configs.
    pub fn normalized(mut self) -> Self {
        self.max_buffer_size = self.max_buffer_size.max(1);
        if self.flush_interval < MIN_FLUSH_INTERVAL {
            self.flush_interval = MIN_FLUSH_INTERVAL;
        }
        self
    }

    /// Merge `patch` into this config; unset fields are left untouched.
    pub fn merge(&mut self, patch: LoggerConfigPatch) {
        if let Some(level) = patch.level {
            self.level = level;
        }
        if let Some(enable_console) = patch.enable_console {
            self.enable_console = enable_console;
        }
        if let Some(enable_remote) = patch.enable_remote {
            self.enable_remote = enable_remote;
        }
        if let Some(endpoint) = patch.remote_endpoint {
            self.remote_endpoint = endpoint;
        }
        if let Some(size) = patch.max_buffer_size {
            self.max_buffer_size = size;
        }
        if let Some(interval) = patch.flush_interval {
            self.flush_interval = interval;
        }
        *self = std::mem::take(self).normalized();
    }
}

/// Partial update applied with [`Logger::set_config`].
///
/// [`Logger::set_config`]: crate::logger::Logger::set_config
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoggerConfigPatch {
    pub level: Option<LogLevel>,
    pub enable_console: Option<bool>,
    pub enable_remote: Option<bool>,
    pub remote_endpoint: Option<String>,
    pub max_buffer_size: Option<usize>,
    pub flush_interval: Option<Duration>,
}

impl LoggerConfigPatch {
    pub fn level(level: LogLevel) -> Self {
        Self { level: Some(level), ..Self::default() }
    }
}
