use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use web_telemetry::config::LoggerConfig;
use web_telemetry::init::init_tracing;
use web_telemetry::noop_sink::NoopSink;
use web_telemetry::Logger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LoggerConfig { enable_console: false, ..LoggerConfig::default() };
    let (logger, _flusher) = Logger::new(Arc::new(NoopSink), config);
    init_tracing(&logger)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!(
        "default config: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    logger.force_flush().await?;
    println!("{:?}", logger.stats());
    Ok(())
}
