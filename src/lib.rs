pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notifications;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::AppConfig;
use db::DbPool;
use engine::blob::{BlobStore, BoundedBlobStore, HttpBlobStore, LocalBlobStore};
use engine::chat::ChatLimits;
use engine::hub::HubHandle;
use engine::identity::{HmacIdentityProvider, IdentityProvider};
use error::AppError;
use notifications::{LogSink, NotificationSink, Notifier, WebhookSink};

/// How long shutdown waits for queued notifications to drain.
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state handed to every HTTP handler and socket task.
pub struct AppState {
    pub db: DbPool,
    pub hub: HubHandle,
    pub identity: Arc<dyn IdentityProvider>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Notifier,
    pub limits: ChatLimits,
    pub max_upload_bytes: usize,
    /// Cancelled on Ctrl-C / SIGTERM. Socket loops exit on it.
    pub shutdown: CancellationToken,
}

/// Background tasks owned by the process, joined on shutdown.
pub struct Workers {
    pub hub: JoinHandle<()>,
    pub notifier: JoinHandle<()>,
}

/// Wire up the collaborators described by `config` around an open pool.
pub fn build_state(
    config: &AppConfig,
    db: DbPool,
    shutdown: CancellationToken,
) -> Result<(Arc<AppState>, Workers), AppError> {
    let blobs: Arc<dyn BlobStore> = match &config.blob.base_url {
        Some(url) => {
            tracing::info!(url = %url, "Using remote blob store");
            let remote = HttpBlobStore::new(url.clone(), config.blob.api_key.clone(), config.blob.timeout())?;
            Arc::new(BoundedBlobStore::new(remote, config.blob.timeout()))
        }
        None => {
            let root = config.data_dir.join("blobs");
            tracing::info!(root = %root.display(), "Using local blob store");
            Arc::new(BoundedBlobStore::new(LocalBlobStore::new(root), config.blob.timeout()))
        }
    };

    let sink: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(
            url.clone(),
            Duration::from_secs(config.notify.timeout_secs.max(1)),
        )?),
        None => Arc::new(LogSink),
    };
    let (notifier, notifier_task) = Notifier::spawn(sink);
    let (hub, hub_task) = HubHandle::spawn();

    let state = Arc::new(AppState {
        db,
        hub,
        identity: Arc::new(HmacIdentityProvider::new(&config.token_secret)),
        blobs,
        notifier,
        limits: ChatLimits::from(&config.messages),
        max_upload_bytes: config.blob.max_upload_bytes,
        shutdown,
    });
    Ok((
        state,
        Workers {
            hub: hub_task,
            notifier: notifier_task,
        },
    ))
}

/// Serve HTTP and sockets on `listener` until `state.shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), AppError> {
    let shutdown = state.shutdown.clone();
    let app = commands::router(state);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Teamwork hub listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("HTTP server shutting down");
        })
        .await?;
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received");
    token.cancel();
}

pub async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)?;
    let _log_guard = logging::init(&config.log, &config.data_dir);
    logging::install_crash_hook(&config.data_dir);

    tracing::info!("Starting Teamwork Hub v{}", env!("CARGO_PKG_VERSION"));

    let pool = db::init_db(&config.data_dir, &config.db)?;
    tracing::info!(max_size = config.db.pool_size, "Database pool ready");

    let shutdown = CancellationToken::new();
    let (state, workers) = build_state(&config, pool, shutdown.clone())?;
    tokio::spawn(shutdown_signal(shutdown));

    let listener = TcpListener::bind(config.bind).await?;
    let hub = state.hub.clone();
    serve(listener, state).await?;

    hub.shutdown();
    if let Err(e) = workers.hub.await {
        tracing::warn!("Hub task ended abnormally: {}", e);
    }
    // The worker exits once the last Notifier handle is dropped.
    if tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, workers.notifier).await.is_err() {
        tracing::warn!("Notification queue did not drain before shutdown");
    }
    tracing::info!("Teamwork hub stopped");
    Ok(())
}
