//! API server entry point.

use api::config::{Config, LogFormat};
use api::{AppState, Backends};
use event_store::PostgresEventStore;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn connect_backends(config: &Config) -> Backends {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory storage");
        return Backends::in_memory();
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to Postgres");
    PostgresEventStore::new(pool.clone())
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to Postgres");
    Backends::postgres(pool)
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Choose storage and build the application state
    let backends = connect_backends(&config).await;
    let (state, worker) = AppState::new(backends, &config);

    // 4. Finish compensations and release reservations left by a previous run
    match state.coordinator.recover().await {
        Ok(report) => tracing::info!(?report, "startup recovery complete"),
        Err(err) => tracing::error!(error = %err, "startup recovery failed"),
    }

    // 5. Start server
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    // Open notification streams never finish on their own; closing the
    // registry ends them so in-flight connections can drain.
    let registry = state.registry.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            registry.close_all().await;
        })
        .await
        .expect("server error");

    // 6. Drain the notification queue before exiting
    drop(state);
    worker.join().await;

    tracing::info!("server shut down gracefully");
}
