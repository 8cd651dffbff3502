//! ensembled: HTTP server around the ensemble orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ensemble::config::Settings;
use ensemble::service::OrchestratorService;
use ensemble::transport::{ServerConfig, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var_os("ENSEMBLE_CONFIG").map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;
    tracing::info!(
        models = settings.models.len(),
        config = ?config_path,
        "configuration loaded"
    );

    let service = Arc::new(OrchestratorService::new(settings.registry()));
    let server = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };

    serve(server, service).await
}
