/// flowkeep server entry point
///
/// Reads configuration from `FLOWKEEP_*` environment variables and serves:
/// - Session API at /api/sessions/*
/// - Documentation cache API at /api/cache/*
/// - Sync inspection at /api/sync/*
/// - Health check at /healthz

use flowkeep::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to 0.0.0.0:3005, ./data and local-only storage
    let config = Config::default();

    start_server(config).await
}
