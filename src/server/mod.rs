//! The central coordinator: TLS accept loop, per-connection dispatch,
//! subscriber fan-out, and background maintenance.

pub mod background;
pub mod connection;
pub mod handlers;
pub mod subscribers;

pub use connection::{serve_connection, ConnState};
pub use handlers::{dispatch, Flow};
pub use subscribers::{ConnectionHandle, SubscriberRegistry};

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discovery;
use crate::transport::{self, TlsError};
use crate::AppState;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// A running coordinator. Dropping it does not stop the server; call
/// [`Coordinator::shutdown`] for an orderly stop.
pub struct Coordinator {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    state: Arc<AppState>,
    tasks: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// Bind the TLS listener, start the accept loop, the background loops,
    /// and (when enabled) the discovery responder.
    pub async fn start(state: Arc<AppState>) -> Result<Self, ServerError> {
        let tls_config = transport::server_config(
            std::path::Path::new(&state.config.tls.cert_file),
            std::path::Path::new(&state.config.tls.key_file),
        )?;
        let acceptor = TlsAcceptor::from(tls_config);

        let bind_address = state.config.node.bind_address.clone();
        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_address,
            source,
        })?;
        info!(addr = %local_addr, "Coordinator listening");

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(accept_loop(
            Arc::clone(&state),
            listener,
            acceptor,
            cancel.clone(),
        )));

        tasks.extend(background::spawn_background_tasks(
            Arc::clone(&state),
            cancel.clone(),
        ));

        if state.config.discovery.enabled {
            let responder = discovery::spawn_responder(
                state.config.discovery.group,
                state.config.discovery.port,
                local_addr.port(),
                cancel.clone(),
            )
            .await;
            match responder {
                Some(task) => tasks.push(task),
                None => warn!("Continuing without multicast discovery"),
            }
        }

        Ok(Self {
            cancel,
            local_addr,
            state,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Cooperative stop: drop the run flag, close the acceptor, join every
    /// task, and stop handing out storage connections.
    pub async fn shutdown(self) {
        info!("Coordinator shutting down");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    error!(error = %err, "Background task panicked during shutdown");
                }
            }
        }
        self.state.pool.shutdown();
        info!("Coordinator stopped");
    }
}

async fn accept_loop(
    state: Arc<AppState>,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    cancel: CancellationToken,
) {
    let limit = Arc::new(Semaphore::new(state.config.node.max_connections));

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (socket, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
            warn!(peer = %peer, "Connection rejected: limit reached");
            continue;
        };

        let _ = socket.set_nodelay(true);
        let acceptor = acceptor.clone();
        let state = Arc::clone(&state);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let stream = match acceptor.accept(socket).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(peer = %peer, error = %err, "TLS handshake failed");
                    return;
                }
            };
            serve_connection(state, stream, peer, cancel).await;
        });
    }
    debug!("Accept loop stopped");
}
