use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::Level;

use web_telemetry::env::{env_or, DEFAULT_INGEST_ADDR, TELEMETRY_INGEST_ADDR_ENV};
use web_telemetry::ingest::{ingest_router, IngestState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let addr: SocketAddr = env_or(TELEMETRY_INGEST_ADDR_ENV, DEFAULT_INGEST_ADDR).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "telemetry ingest listening");

    let app = ingest_router(IngestState::default());
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
