/// Driftway: governance and reconciliation engine for workflow definitions
///
/// Main entry point for the Driftway server. Initializes configuration and
/// starts the HTTP server with its background reconciliation loops.

use driftway::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Environment and mapping management at /api/{tenant}/*
/// - Incident lifecycle and promotion endpoints
/// - Live event stream at /api/{tenant}/events
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3010 and SQLite databases)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
