use std::sync::Arc;

use crate::env::{env_or, DEFAULT_BASE_URL, LOG_SINK_BASE_URL_ENV};
use crate::noop_sink::NoopSink;
use crate::sink::LogSink;

/// Supported sink kinds that can be selected via an endpoint string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Http,
    Noop,
}

/// Sink target resolved from an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTarget {
    /// Selected sink implementation.
    pub kind: SinkKind,
    /// Absolute URL for [`SinkKind::Http`], the raw endpoint otherwise.
    pub url: String,
}

/// Parse an endpoint and infer the sink kind.
///
/// Examples:
/// - "https://telemetry.example.com/api/logs"
/// - "/api/logs" (joined onto `base_url`)
/// - "noop://"
pub fn parse_endpoint(endpoint: &str, base_url: &str) -> Result<SinkTarget, EndpointError> {
    let trimmed = endpoint.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(SinkTarget { kind: SinkKind::Http, url: trimmed.to_string() })
    } else if lower.starts_with("noop://") {
        Ok(SinkTarget { kind: SinkKind::Noop, url: trimmed.to_string() })
    } else if trimmed.starts_with('/') {
        let url = format!("{}{}", base_url.trim_end_matches('/'), trimmed);
        Ok(SinkTarget { kind: SinkKind::Http, url })
    } else if trimmed.is_empty() {
        Err(EndpointError::Empty)
    } else {
        Err(EndpointError::UnknownScheme(trimmed.to_string()))
    }
}

/// Error type returned when resolving an endpoint into a sink.
#[derive(thiserror::Error, Debug)]
pub enum EndpointError {
    #[error("log sink endpoint is empty")]
    Empty,

    #[error("unknown or unsupported endpoint scheme: {0}")]
    UnknownScheme(String),

    #[error("http feature is not enabled")]
    HttpFeatureDisabled,
}

/// Create a concrete [`LogSink`] for `endpoint`, resolving relative paths
/// against `LOG_SINK_BASE_URL`.
///
/// This is the main entry point for applications that select the remote
/// endpoint through configuration instead of constructing sinks manually.
pub fn make_sink(endpoint: &str) -> Result<Arc<dyn LogSink>, EndpointError> {
    let base_url = env_or(LOG_SINK_BASE_URL_ENV, DEFAULT_BASE_URL);
    make_sink_for_target(&parse_endpoint(endpoint, &base_url)?)
}

pub fn make_sink_for_target(target: &SinkTarget) -> Result<Arc<dyn LogSink>, EndpointError> {
    match target.kind {
        SinkKind::Noop => Ok(Arc::new(NoopSink) as Arc<dyn LogSink>),
        SinkKind::Http => {
            #[cfg(feature = "http")]
            {
                use crate::http_sink::HttpSink;
                Ok(Arc::new(HttpSink::new(target.url.clone())) as Arc<dyn LogSink>)
            }

            #[cfg(not(feature = "http"))]
            {
                let _ = target;
                Err(EndpointError::HttpFeatureDisabled)
            }
        }
    }
}
