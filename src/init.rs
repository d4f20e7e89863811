use crate::layer::LoggerLayer;
use crate::logger::Logger;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// Configuration of the global `tracing` subscriber installed around a
/// [`Logger`].
///
/// **Fields**
/// - `min_level`: most verbose `tracing` level forwarded into the logger
///   (the logger's own minimum level still applies afterwards).
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt` layer (filtered
///   at `min_level`) is added so console-mirrored records and the crate's
///   diagnostics are printed.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub min_level: Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
            enable_stdout: true,
        }
    }
}

/// Error returned when a global subscriber is already installed.
#[derive(thiserror::Error, Debug)]
#[error("failed to install global tracing subscriber: {0}")]
pub struct InitError(#[from] tracing::subscriber::SetGlobalDefaultError);

/// Install the global `tracing` subscriber for `logger`.
///
/// **Parameters**
/// - `logger`: receives every application event accepted by the
///   [`LoggerLayer`].
/// - `config`: [`LayerConfig`] controlling forwarding and stdout output.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`LoggerLayer`] (and a `fmt` layer
/// when `enable_stdout` is set) as the process-wide default subscriber.
pub fn init_tracing_with_config(logger: &Logger, config: LayerConfig) -> Result<(), InitError> {
    let layer = LoggerLayer::new(logger.clone(), config.min_level);

    // The two subscriber shapes have different types, so install each branch
    // separately.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_filter(LevelFilter::from_level(config.min_level));
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Install the global subscriber with [`LayerConfig::default`].
pub fn init_tracing(logger: &Logger) -> Result<(), InitError> {
    init_tracing_with_config(logger, LayerConfig::default())
}
