/// Environment variable names used by this crate for configuring the
/// logger, its sink and the ingestion server.
///
/// These are purely helpers; the core types remain decoupled from
/// environment access.

/// Remote endpoint for log batches. Either an absolute URL, a path resolved
/// against [`LOG_SINK_BASE_URL_ENV`], or `noop://`.
pub const LOG_SINK_ENDPOINT_ENV: &str = "LOG_SINK_ENDPOINT";

/// Base URL used to resolve path-only endpoints, e.g. `http://127.0.0.1:3000`.
pub const LOG_SINK_BASE_URL_ENV: &str = "LOG_SINK_BASE_URL";

/// Minimum level name (`debug`, `info`, `warn`, `error`, `fatal`).
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Buffer length that forces an immediate flush.
pub const LOG_MAX_BUFFER_SIZE_ENV: &str = "LOG_MAX_BUFFER_SIZE";

/// Periodic flush interval in milliseconds.
pub const LOG_FLUSH_INTERVAL_MS_ENV: &str = "LOG_FLUSH_INTERVAL_MS";

/// Whether records are mirrored to the console (`true`/`false`).
pub const LOG_ENABLE_CONSOLE_ENV: &str = "LOG_ENABLE_CONSOLE";

/// Whether records are buffered and shipped (`true`/`false`).
pub const LOG_ENABLE_REMOTE_ENV: &str = "LOG_ENABLE_REMOTE";

/// Bind address of the `telemetry-ingest` server.
pub const TELEMETRY_INGEST_ADDR_ENV: &str = "TELEMETRY_INGEST_ADDR";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_LOGS_PATH: &str = "/api/logs";
pub const DEFAULT_PERFORMANCE_PATH: &str = "/api/performance";
pub const DEFAULT_INGEST_ADDR: &str = "127.0.0.1:3000";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back to `default` when it
/// is unset or doesn't parse.
pub fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
