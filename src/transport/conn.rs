//! Frame I/O over any byte-ordered, reliable stream.
//!
//! A frame's own length header delimits it on the wire, so sends carry no
//! stream prefix. Receives read exactly the header, gate on the magic, then
//! read the advertised body and verify the checksum.

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::proto::{Frame, FrameError, HEADER_SIZE, MAGIC, MAX_FRAME_SIZE};

use super::TransportError;

/// Read one frame. Fails on EOF, magic mismatch, short reads, undecodable
/// frames, and checksum mismatches.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(map_eof)?;

    let mut magic_bytes = &header[0..4];
    let magic = magic_bytes.get_u32();
    if magic != MAGIC {
        return Err(TransportError::BadMagic(magic));
    }
    let mut len_bytes = &header[8..12];
    let body_len = len_bytes.get_u32() as usize;
    if body_len > MAX_FRAME_SIZE {
        return Err(TransportError::Decode(FrameError::TooLarge(body_len)));
    }

    let mut buf = vec![0u8; HEADER_SIZE + body_len];
    buf[..HEADER_SIZE].copy_from_slice(&header);
    reader
        .read_exact(&mut buf[HEADER_SIZE..])
        .await
        .map_err(map_eof)?;

    let frame = Frame::decode(&buf)?;
    if !frame.verify_checksum() {
        return Err(TransportError::ChecksumMismatch);
    }
    Ok(frame)
}

/// Write a frame in full; partial writes are drained by `write_all`.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    write_encoded(writer, &frame.encode()).await
}

/// Write pre-encoded frame bytes (used by the fan-out, which encodes once).
pub async fn write_encoded<W>(writer: &mut W, encoded: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn map_eof(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(err)
    }
}

/// Bidirectional frame connection owning its stream. The client side and the
/// tests use this; the coordinator splits the stream instead so a dedicated
/// writer task can serialize responses and fan-out pushes.
pub struct FrameConn<S> {
    stream: S,
}

impl<S> FrameConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        write_frame(&mut self.stream, frame).await
    }

    pub async fn recv(&mut self) -> Result<Frame, TransportError> {
        read_frame(&mut self.stream).await
    }

    /// Attempt an orderly shutdown of the underlying stream. Idempotent at
    /// the protocol level: later calls surface as no-ops or `Closed`.
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::MessageType;

    fn checked_frame(kind: MessageType) -> Frame {
        let mut frame = Frame::new(kind);
        frame.set_str("client_id", "test");
        frame.compute_checksum();
        frame
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client = FrameConn::new(client);
        let mut server = FrameConn::new(server);

        let frame = checked_frame(MessageType::ConnectRequest);
        client.send(&frame).await.unwrap();

        let received = server.recv().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn eof_surfaces_as_closed() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);

        let mut server = FrameConn::new(server);
        assert!(matches!(server.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn bad_magic_is_rejected_before_the_body() {
        let (client, server) = tokio::io::duplex(4096);
        let mut raw = client;
        let mut server = FrameConn::new(server);

        let mut bytes = checked_frame(MessageType::ConnectRequest).encode();
        bytes[0] = 0x00;
        raw.write_all(&bytes).await.unwrap();

        assert!(matches!(
            server.recv().await,
            Err(TransportError::BadMagic(_))
        ));
    }

    #[tokio::test]
    async fn corrupted_body_fails_checksum_verification() {
        let (client, server) = tokio::io::duplex(4096);
        let mut raw = client;
        let mut server = FrameConn::new(server);

        let mut bytes = checked_frame(MessageType::ConnectRequest).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        raw.write_all(&bytes).await.unwrap();

        assert!(matches!(
            server.recv().await,
            Err(TransportError::ChecksumMismatch)
        ));
    }

    #[tokio::test]
    async fn partial_frame_then_eof_is_a_short_read() {
        let (client, server) = tokio::io::duplex(4096);
        let mut raw = client;
        let mut server = FrameConn::new(server);

        let bytes = checked_frame(MessageType::ConnectRequest).encode();
        raw.write_all(&bytes[..bytes.len() - 2]).await.unwrap();
        drop(raw);

        assert!(matches!(server.recv().await, Err(TransportError::Closed)));
    }
}
