//! Listener lifecycle: open the store, bind both addresses, serve until a
//! shutdown signal arrives.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use promkv::PromKvError;
use promkv::store::Store;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::config::ServerConfig;

/// Errors that stop the server from starting or keep it from serving.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The store could not be opened or its sequence recovered.
    #[error("failed to open store: {0}")]
    Store(#[from] PromKvError),

    /// A listener address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A listener failed while serving.
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Runs the write and read listeners until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the sequence cannot be
/// recovered, or either address cannot be bound.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let state = {
        let data_dir = config.data_dir.clone();
        let options = config.store_options();
        let backup = config.backup_config();
        let scan_timeout = config.scan_timeout;
        tokio::task::spawn_blocking(move || {
            let store = Arc::new(Store::open(data_dir, options)?);
            AppState::new(store, backup, scan_timeout)
        })
        .await
        .map_err(|e| ServerError::Serve(io::Error::other(e)))??
    };

    let write_listener = bind(config.write_addr).await?;
    let read_listener = bind(config.read_addr).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    tracing::info!(addr = %config.write_addr, "write listener started");
    tracing::info!(addr = %config.read_addr, "read listener started");

    let write = axum::serve(
        write_listener,
        api::write_router(state.clone(), config.max_body_bytes),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let read = axum::serve(read_listener, api::read_router(state, config.max_body_bytes))
        .with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(write.into_future(), read.into_future()).map_err(ServerError::Serve)?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Listen for SIGTERM and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
