use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::config::{Config, GatewayMode};
use vigil::services::{
    HyperliquidGateway, InMemoryGateway, MarketGateway, ResilientGateway, RetryPolicy,
    SqliteStore, StaticCredentials,
};
use vigil::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Vigil on {}:{}", config.host, config.port);

    // Open the run ledger and finalize runs a previous process left behind
    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    let interrupted = store.fail_dangling_runs("interrupted")?;
    if interrupted > 0 {
        warn!("Marked {} interrupted strategy runs as failed", interrupted);
    }

    // Market gateway
    let retry = RetryPolicy {
        max_retries: config.gateway.max_retries,
        ..RetryPolicy::default()
    };
    let gateway: Arc<dyn MarketGateway> = match config.gateway.mode {
        GatewayMode::Http => {
            info!(
                "Gateway: {} (orders via {})",
                config.gateway.info_url, config.gateway.exec_url
            );
            Arc::new(ResilientGateway::new(
                HyperliquidGateway::new(
                    config.gateway.info_url.clone(),
                    config.gateway.exec_url.clone(),
                    config.gateway.timeout,
                ),
                config.gateway.timeout,
                retry,
                config.gateway.candle_cache_ttl,
            ))
        }
        GatewayMode::Memory => {
            warn!("Gateway: in-memory dry run, no exchange traffic");
            Arc::new(ResilientGateway::new(
                InMemoryGateway::new(),
                config.gateway.timeout,
                retry,
                config.gateway.candle_cache_ttl,
            ))
        }
    };

    let credentials = Arc::new(StaticCredentials::from_pairs(&config.access_tokens));
    info!("Loaded access tokens for {} wallets", credentials.len());

    if config.cron_secret.is_none() && config.trusted_agent_key.is_none() {
        warn!("Neither CRON_SECRET nor TRUSTED_AGENT_KEY is set; protected endpoints are closed");
    }

    // Create application state
    let state = AppState::new(config.clone(), store, gateway, credentials);

    // Start the in-process scheduler
    let scheduler = state.scheduler();
    if config.cycles.scheduler_enabled {
        scheduler.start();
    } else {
        info!("In-process scheduler disabled; cycles run only via /api/cron");
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = vigil::create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Vigil listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    scheduler.shutdown();
    Ok(())
}
