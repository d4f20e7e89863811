use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use web_telemetry::config::LoggerConfig;
use web_telemetry::http_sink::HttpSink;
use web_telemetry::instrument::{ErrorInterceptor, ErrorSignal, InstrumentedClient};
use web_telemetry::Logger;

/// Ships a batch to a local ingestion endpoint. Run `telemetry-ingest`
/// first, or let this example start one in-process with `--serve`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let base = if std::env::args().any(|a| a == "--serve") {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = web_telemetry::ingest::ingest_router(Default::default());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
        });
        format!("http://{addr}")
    } else {
        web_telemetry::env::DEFAULT_BASE_URL.to_string()
    };

    let sink = HttpSink::new(format!("{base}/api/logs"));
    let (logger, _flusher) = Logger::new(Arc::new(sink), LoggerConfig::default());

    let client = InstrumentedClient::new(reqwest::Client::new(), logger.clone());
    let request = client.inner().get(format!("{base}/api/logs?limit=10"));
    if let Err(e) = client.send(request).await {
        eprintln!("query failed: {e}");
    }

    ErrorInterceptor::new(logger.clone()).report(ErrorSignal::ResourceLoad {
        target: "avatar.png".into(),
        kind: "error".into(),
    });

    let sent = logger.flush().await?;
    println!("flushed {sent} records for session {}", logger.session_id());
    Ok(())
}
