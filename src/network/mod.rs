pub mod codec;
pub mod crypt;
pub mod subnet;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crypt::CryptError;

/// Errors crossing the per-connection framing layer. Everything here closes
/// the connection; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("connection closed by peer")]
    Closed,

    #[error("invalid packet length {0}")]
    InvalidLength(usize),

    #[error("packet checksum verification failed")]
    Checksum,

    #[error("empty packet body")]
    Empty,

    #[error(transparent)]
    Crypt(#[from] CryptError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one `[len:u16 LE][body]` frame. EOF on the length prefix is a normal
/// disconnect.
pub async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>, ConnError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    if let Err(e) = stream.read_exact(&mut header).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ConnError::Closed);
        }
        return Err(ConnError::Io(e));
    }
    let size = u16::from_le_bytes(header) as usize;
    if size < 2 {
        return Err(ConnError::InvalidLength(size));
    }
    let mut body = vec![0u8; size - 2];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one `[len:u16 LE][body]` frame as a single buffer.
pub async fn write_frame<W>(stream: &mut W, body: &[u8]) -> Result<(), ConnError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(&((body.len() + 2) as u16).to_le_bytes());
    out.extend_from_slice(body);
    stream.write_all(&out).await?;
    Ok(())
}
