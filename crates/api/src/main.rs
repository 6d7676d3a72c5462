//! Beacon notification server

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beacon_api::auth::{CachingVerifier, JwtVerifier};
use beacon_api::buffer::{MemoryStore, RedisStore};
use beacon_api::routes::create_router;
use beacon_api::{AppState, Config, NotificationHub};
use beacon_shared::DurableStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!(bind_address = %config.bind_address, "Starting Beacon notification server");

    let store: Arc<dyn DurableStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStore::connect(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set, offline buffer is in-memory and lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let verifier = Arc::new(CachingVerifier::new(
        Arc::new(JwtVerifier::new(&config.jwt_secret)),
        config.token_cache_ttl,
    ));

    let hub = Arc::new(NotificationHub::new(
        config.hub_config(),
        verifier.clone(),
        store,
    ));
    hub.start_heartbeat();

    let shutdown = CancellationToken::new();
    spawn_cache_cleanup(Arc::clone(&verifier), config.token_cache_ttl, shutdown.clone());

    let grace = config.shutdown_grace;
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Listening");

    let app = create_router(AppState::new(config, Arc::clone(&hub), verifier));
    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            hub.shutdown().await;
            result.context("Server task failed")?.context("Server error")?;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    tracing::info!("Shutdown signal received, closing connections");
    hub.shutdown().await;
    shutdown.cancel();

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.context("Server task failed")?.context("Server error")?,
        Err(_) => tracing::warn!(
            grace_secs = grace.as_secs(),
            "Grace period elapsed before the server drained"
        ),
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Periodically evict expired token cache entries
fn spawn_cache_cleanup(verifier: Arc<CachingVerifier>, every: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => verifier.cache().cleanup(),
                () = cancel.cancelled() => return,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
