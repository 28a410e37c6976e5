//! TCP transport: listener plus the length-prefixed event framing.
//!
//! Wire format is a 4-byte big-endian length followed by one CBOR-encoded
//! event. The prefix is capped so a malformed or hostile peer cannot make
//! the server allocate unbounded buffers.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::error::ServerError;

/// Maximum accepted frame payload, in bytes.
///
/// A full room snapshot with 70 log entries and a busy token board fits in
/// a few kilobytes; one megabyte is generous headroom.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// TCP listener for client connections.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind to the given address.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    /// Accept the next inbound connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` on clean end-of-stream (peer closed between frames).
/// A close mid-frame or an oversized prefix is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<BytesMut>, ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ServerError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_SIZE}"
        )));
    }

    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ServerError::Protocol(format!(
            "refusing to send frame of {} bytes",
            payload.len()
        )));
    }

    let prefix = u32::try_from(payload.len())
        .map_err(|_| ServerError::Protocol("frame too large for length prefix".to_string()))?
        .to_be_bytes();

    writer.write_all(&prefix).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
