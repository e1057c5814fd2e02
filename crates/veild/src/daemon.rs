//! Daemon lifecycle: store setup, background sweep, HTTP server

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use veil_core::config::VeilConfig;
use veil_snippets::SnippetStore;

use crate::api::{router, AppState};
use crate::metrics::Metrics;

pub async fn run(config: VeilConfig) -> Result<()> {
    info!("daemon starting");

    let store = Arc::new(SnippetStore::open(&config.store).context("opening snippet store")?);
    info!(
        backend = ?config.store.backend,
        ttl_secs = store.ttl_secs(),
        "snippet store ready"
    );

    let metrics = Arc::new(Metrics::new());

    if config.store.sweep_interval_secs > 0 {
        let every = Duration::from_secs(config.store.sweep_interval_secs);
        tokio::spawn(sweep_loop(store.clone(), metrics.clone(), every));
    } else {
        info!("background sweep disabled; expiry enforced on fetch only");
    }

    let state = AppState {
        store,
        metrics,
    };
    let app = router(state, config.store.max_snippet_bytes, config.daemon.metrics);

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;

    info!(
        addr = %config.daemon.listen,
        share_base = %config.daemon.public_url,
        metrics = config.daemon.metrics,
        "HTTP: listening on /api/snippets, /healthz"
    );

    notify_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server")?;

    info!("daemon stopped");
    Ok(())
}

/// Periodically remove expired snippets. Fetches never depend on this.
async fn sweep_loop(store: Arc<SnippetStore>, metrics: Arc<Metrics>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.sweep()).await {
            Ok(Ok(removed)) => metrics.record_swept(removed),
            Ok(Err(e)) => warn!("snippet sweep failed: {e}"),
            Err(e) => error!("snippet sweep task panicked: {e}"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
