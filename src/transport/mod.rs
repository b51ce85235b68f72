//! TLS transport: certificate handling and framed message I/O.

pub mod conn;
pub mod tls;

pub use conn::{read_frame, write_encoded, write_frame, FrameConn};
pub use tls::{client_config, server_config, TlsError};

use std::path::Path;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::proto::FrameError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed by peer")]
    Closed,
    #[error("Invalid frame magic: 0x{0:08X}")]
    BadMagic(u32),
    #[error("Frame decode failed: {0}")]
    Decode(#[from] FrameError),
    #[error("Frame checksum mismatch")]
    ChecksumMismatch,
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
    #[error("Invalid server name: {0}")]
    InvalidName(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client role: resolve, TCP-connect, and run the TLS handshake. With a
/// trust anchor the server chain is verified; without one it is accepted
/// as-is.
pub async fn connect(
    host: &str,
    port: u16,
    trust_anchor: Option<&Path>,
) -> Result<FrameConn<TlsStream<TcpStream>>, TransportError> {
    let config = client_config(trust_anchor)?;
    let connector = TlsConnector::from(config);

    let tcp = TcpStream::connect((host, port)).await?;
    let _ = tcp.set_nodelay(true);

    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::InvalidName(host.to_string()))?;
    let stream = connector.connect(server_name, tcp).await?;
    Ok(FrameConn::new(stream))
}
