//! Buffered client telemetry.
//!
//! - [`logger::Logger`] buffers structured [`record::LogRecord`]s and ships
//!   them to a [`sink::LogSink`] in batches.
//! - [`instrument`] wraps outgoing HTTP calls and ambient error signals.
//! - [`vitals::VitalsSampler`] measures page vitals with bounded observers.
//! - [`ingest`] (feature `server`) is the `axum` endpoint the batches land on.

pub mod backend;
pub mod config;
pub mod console;
pub mod env;
pub mod init;
pub mod instrument;
pub mod layer;
pub mod logger;
pub mod noop_sink;
pub mod record;
pub mod sink;
pub mod vitals;

#[cfg(feature = "http")]
pub mod http_sink;

#[cfg(feature = "server")]
pub mod ingest;

pub use logger::Logger;
pub use record::{LogBatch, LogContext, LogLevel, LogRecord};
pub use sink::{LogSink, SinkError};
