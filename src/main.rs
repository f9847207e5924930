use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use outreach_queue::clock::SystemClock;
use outreach_queue::config::Config;
use outreach_queue::db::{MemoryStore, PgStore, QueueStore};
use outreach_queue::providers::ProviderRegistry;
use outreach_queue::providers::email::SmtpEmailProvider;
use outreach_queue::providers::whatsapp::HttpWhatsAppProvider;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting outreach queue");

    let store: Arc<dyn QueueStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Migrations applied");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let mut providers = ProviderRegistry::new();
    if let Some(whatsapp) = &config.whatsapp {
        match HttpWhatsAppProvider::new(whatsapp) {
            Ok(provider) => providers.register(Arc::new(provider)),
            Err(e) => tracing::warn!("WhatsApp provider not available: {e}"),
        }
    }
    if let Some(smtp) = &config.smtp {
        match SmtpEmailProvider::new(smtp) {
            Ok(provider) => providers.register(Arc::new(provider)),
            Err(e) => tracing::warn!("Email provider not available: {e}"),
        }
    }
    for provider in providers.list() {
        tracing::info!(
            channel = provider.channel().as_str(),
            provider = provider.name(),
            "Provider configured"
        );
    }

    let addr = SocketAddr::new(config.host, config.port);
    let (app, state) = outreach_queue::build_app(store, providers, Arc::new(SystemClock), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = state.dispatcher.clone().run_scheduler(shutdown_rx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.dispatcher.begin_shutdown();
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!("Scheduler task ended abnormally: {e}");
    }
    state.dispatcher.drain().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
