use better_analytics::config::Config;
use better_analytics::server::{self, AppState};
use better_analytics::storage::store::EventStore;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "better_analytics=info,tower_http=info".into());
    if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl-C or SIGTERM, then arms a hard deadline for draining.
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!(timeout_secs, "Shutting down");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}

#[tokio::main]
async fn main() {
    // Config warnings go to stderr before the real subscriber exists.
    let config_path = std::env::args().nth(1);
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .finish(),
        || Config::load(config_path.as_deref().map(std::path::Path::new)),
    );
    init_tracing(&config);

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = ?config.database_path,
        "Starting Better Analytics"
    );

    let store = EventStore::open(config.database_path.as_deref()).expect("Failed to open DuckDB");
    let shutdown_timeout = config.shutdown_timeout_secs;
    let addr = format!("{}:{}", config.host, config.port);

    let app = server::build_router(AppState::new(store, config));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await
        .expect("Server error");
    tracing::info!("Server stopped");
}
