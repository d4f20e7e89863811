use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, Level};

use web_telemetry::config::LoggerConfig;
use web_telemetry::init::{init_tracing_with_config, LayerConfig};
use web_telemetry::noop_sink::NoopSink;
use web_telemetry::record::LogLevel;
use web_telemetry::Logger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LoggerConfig {
        level: LogLevel::Warn,
        enable_console: false,
        max_buffer_size: 1_000,
        flush_interval: Duration::from_millis(200),
        ..LoggerConfig::default()
    };
    let (logger, _flusher) = Logger::new(Arc::new(NoopSink), config);

    let layer_config = LayerConfig { min_level: Level::WARN, enable_stdout: false };
    init_tracing_with_config(&logger, layer_config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!(
        "custom config: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    logger.force_flush().await?;
    println!("{:?}", logger.stats());
    Ok(())
}
