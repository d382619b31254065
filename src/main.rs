use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use clinical_sql::{config::Config, routes::create_router, store::workspace::sweep_stale, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinical_sql=debug,tower_http=debug,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        work_dir = %config.storage.work_dir.display(),
        "Configuration loaded"
    );
    if config.llm.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; each request must supply a key");
    }

    // Stores left behind by a previous run
    std::fs::create_dir_all(&config.storage.work_dir)?;
    sweep_stale(&config.storage.work_dir)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = create_router(AppState::new(config));

    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
