use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use sword_deposit::config::DepositConfig;
use sword_deposit::infrastructure::{database, storage};
use sword_deposit::services::transfer_store::TransferStore;
use sword_deposit::services::worker::BackgroundWorker;
use sword_deposit::{AppState, create_app};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sword_deposit=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting deposit service");

    let config = DepositConfig::from_env();
    info!(
        "max upload size {} MB, orphan policy {:?}",
        config.max_upload_size / 1024 / 1024,
        config.orphan_policy
    );

    let db = database::setup_database().await?;
    let storage_root = storage::setup_storage(&config).await?;
    let store = Arc::new(TransferStore::new(db.clone(), storage_root));

    let state = AppState {
        db: db.clone(),
        store: store.clone(),
        config: config.clone(),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let worker = BackgroundWorker::new(store.clone(), config.clone(), shutdown_rx);
    tokio::spawn(async move {
        worker.run().await;
    });

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!("finished in {:?} with status {}", latency, response.status());
                },
            ),
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("server ready at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("ctrl-c received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
