use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse_api::config::ServerConfig;
use gatehouse_api::router::build_app_router;
use gatehouse_api::state::AppState;
use gatehouse_dispatch::analytics::TracingAnalytics;
use gatehouse_dispatch::catalog::Catalog;
use gatehouse_dispatch::{screener, DispatchConfig, Services};
use gatehouse_queue::{Broker, ClaimStore, InMemoryBroker, InMemoryClaimStore, RedisBroker, RedisClaimStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gatehouse_api=debug,gatehouse_dispatch=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let dispatch_config = DispatchConfig::from_env().expect("Invalid dispatch configuration");
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = gatehouse_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    gatehouse_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    gatehouse_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready, migrations applied");

    // --- Broker and claim markers ---
    let (broker, claims): (Arc<dyn Broker>, Arc<dyn ClaimStore>) = match std::env::var("REDIS_URL") {
        Ok(url) => {
            let broker = RedisBroker::new(&url).expect("Invalid REDIS_URL");
            let claims = RedisClaimStore::new(&url).expect("Invalid REDIS_URL");
            broker.health_check().await.expect("Redis health check failed");
            tracing::info!("Using Redis broker and claim store");
            (Arc::new(broker), Arc::new(claims))
        }
        Err(_) => {
            tracing::warn!("REDIS_URL not set, using in-process broker and claim store");
            (Arc::new(InMemoryBroker::new()), Arc::new(InMemoryClaimStore::new()))
        }
    };

    // --- Dispatch services ---
    let prompt_screener =
        screener::from_patterns(&dispatch_config.prompt_blocklist).expect("Invalid PROMPT_BLOCKLIST pattern");
    let catalog = Catalog::load(pool.clone(), dispatch_config.catalog_refresh)
        .await
        .expect("Failed to load lookup catalog");

    let cancel = CancellationToken::new();
    let catalog_handle = tokio::spawn(Arc::clone(&catalog).run(cancel.clone()));

    let services = Services::new(
        pool,
        dispatch_config,
        catalog,
        broker,
        claims,
        prompt_screener,
        Arc::new(TracingAnalytics),
    );
    let recovered = services.recover().await.expect("Failed to recover in-flight jobs");
    tracing::info!(jobs = recovered, "Dispatch services started");

    // --- Router ---
    let state = AppState {
        services,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse().expect("Invalid HOST address"), config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), catalog_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
