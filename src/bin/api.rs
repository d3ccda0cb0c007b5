use grounded_docgen::{agent::Orchestrator, api::start_server, config::AppConfig, retrieval::InMemoryIndex};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    info!("Grounded document generator - API Server");
    info!(port = config.port, model = %config.executor.mini_model, "Configuration loaded");

    let index = Arc::new(InMemoryIndex::new());
    let orchestrator = Arc::new(Orchestrator::from_config(&config, index)?);

    info!("Orchestrator initialized");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
