//! Per-connection serve loop.
//!
//! Each accepted stream is split: the reader half runs the synchronous
//! request/response loop, and a dedicated writer task owns the write half,
//! draining an mpsc channel. Responses and fan-out pushes go through the
//! same channel, so frames are never interleaved mid-stream and requests on
//! one connection are processed strictly in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{read_frame, write_encoded, TransportError};
use crate::AppState;

use super::handlers::{self, Flow};
use super::subscribers::ConnectionHandle;

/// Outbound frames queued per connection before back-pressure kicks in.
const OUTBOUND_QUEUE: usize = 64;

/// Mutable per-connection state threaded through the dispatcher.
pub struct ConnState {
    pub connection_id: String,
    pub handle: Arc<ConnectionHandle>,
    pub peer_address: String,
    pub peer_port: u16,
    pub session_token: Option<String>,
}

/// Serve one accepted (already handshaked) stream until EOF, a transport
/// error, an explicit disconnect, or shutdown.
pub async fn serve_connection<S>(
    state: Arc<AppState>,
    stream: S,
    peer: SocketAddr,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(connection = %connection_id, peer = %peer, "Client connected");

    let (mut reader, writer) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);
    let handle = ConnectionHandle::new(connection_id.clone(), outbound_tx);
    let writer_task = tokio::spawn(drain_outbound(writer, outbound_rx));

    let mut conn = ConnState {
        connection_id: connection_id.clone(),
        handle: Arc::clone(&handle),
        peer_address: peer.ip().to_string(),
        peer_port: peer.port(),
        session_token: None,
    };

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(TransportError::Closed) => {
                debug!(connection = %connection_id, "Peer closed the connection");
                break;
            }
            Err(err) => {
                // Integrity failures (bad magic, checksum, undecodable
                // frames) drop the connection; there is no frame to answer
                warn!(connection = %connection_id, error = %err, "Dropping connection");
                break;
            }
        };

        debug!(
            connection = %connection_id,
            kind = frame.kind().name(),
            "Incoming message"
        );

        match handlers::dispatch(&state, &mut conn, frame).await {
            Flow::Respond(response) => {
                if !conn.handle.push(response.encode()) {
                    break;
                }
            }
            Flow::Close => break,
        }
    }

    // Teardown: the subscriber entry and the bookkeeping row are bounded by
    // the connection's lifetime
    state.subscribers.remove(&connection_id);
    if let Ok(db) = state.pool.acquire().await {
        if let Err(err) = db.remove_connection(&connection_id) {
            warn!(connection = %connection_id, error = %err, "Failed to remove connection row");
        }
    }

    drop(conn);
    drop(handle);
    let _ = writer_task.await;
    info!(connection = %connection_id, "Client disconnected");
}

/// Writer task: owns the write half, drains queued frames in order, exits
/// when every sender (the serve loop and the subscriber registry) is gone.
async fn drain_outbound<W>(mut writer: W, mut outbound: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(encoded) = outbound.recv().await {
        if let Err(err) = write_encoded(&mut writer, &encoded).await {
            debug!(error = %err, "Outbound write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
