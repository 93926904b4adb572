//! Wire-level framing over a raw TCP stream: the listen-port handshake
//! (spec §6) and reading/writing a whole [`MessageBuffer`].

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

use super::TransportError;
use crate::buffer::{BufferError, MessageBuffer};

/// Length, in bytes, of the handshake's little-endian listen-port prefix
/// (spec §6: "`u32 clientListenPort` — little-endian, exactly 4 bytes").
pub const HANDSHAKE_LEN: usize = 4;

/// Length, in bytes, of [`MessageBuffer`]'s own wire header (spec §3: an
/// 8-byte total length followed by a 4-byte cursor), read first so the
/// remaining body length is known before the rest is read.
const LENGTH_PREFIX_LEN: usize = 8;

/// Send our listen port to a freshly dialled peer so the acceptor can key us
/// by `(remoteIP, remoteListenPort)` rather than the ephemeral source port
/// (spec §4.2: "the remote sends its own listen port as a 4-byte
/// little-endian prefix").
///
/// # Errors
/// Propagates the underlying write's I/O error.
pub async fn write_handshake<W: AsyncWrite + Unpin>(stream: &mut W, listen_port: u16) -> Result<(), TransportError> {
    stream.write_all(&u32::from(listen_port).to_le_bytes()).await?;
    Ok(())
}

/// Read a peer's listen-port handshake prefix.
///
/// # Errors
/// Propagates the underlying read's I/O error.
pub async fn read_handshake<R: AsyncRead + Unpin>(stream: &mut R) -> Result<u32, TransportError> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}

/// Serialise and write a whole [`MessageBuffer`].
///
/// # Errors
/// Returns [`TransportError::Malformed`] if the buffer cannot be serialised
/// (a frame too large to represent in the wire header), or
/// [`TransportError::Io`] if the write fails.
pub async fn write_buffer<W: AsyncWrite + Unpin>(stream: &mut W, buffer: &MessageBuffer) -> Result<(), TransportError> {
    let bytes = buffer.write_to()?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Read one whole [`MessageBuffer`] previously written by
/// [`write_buffer`]: the 8-byte length prefix first, then exactly that many
/// remaining bytes.
///
/// # Errors
/// Returns [`TransportError::Malformed`] if the declared length is smaller
/// than the header it must contain, or if the body fails to parse, and
/// [`TransportError::Io`] (including a clean EOF) if the read fails.
pub async fn read_buffer<R: AsyncRead + Unpin>(stream: &mut R) -> Result<MessageBuffer, TransportError> {
    let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
    stream.read_exact(&mut len_bytes).await?;
    let total_len = u64::from_be_bytes(len_bytes);
    let total_len = usize::try_from(total_len)
        .map_err(|_| TransportError::Malformed(BufferError::MalformedMessage("declared length overflows usize")))?;
    if total_len < LENGTH_PREFIX_LEN {
        return Err(TransportError::Malformed(BufferError::MalformedMessage(
            "declared length shorter than buffer header",
        )));
    }
    let mut rest = vec![0u8; total_len - LENGTH_PREFIX_LEN];
    stream.read_exact(&mut rest).await?;
    let mut whole = Vec::with_capacity(total_len);
    whole.extend_from_slice(&len_bytes);
    whole.extend_from_slice(&rest);
    Ok(MessageBuffer::read_from(&whole)?)
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn handshake_round_trips() {
        let (mut a, mut b) = duplex(64);
        write_handshake(&mut a, 4242).await.expect("write");
        let port = read_handshake(&mut b).await.expect("read");
        assert_eq!(port, 4242);
    }

    #[tokio::test]
    async fn buffer_round_trips_over_a_stream() {
        let (mut a, mut b) = duplex(256);
        let mut buf = MessageBuffer::new();
        buf.push_frame(b"hello".to_vec());
        write_buffer(&mut a, &buf).await.expect("write");
        let decoded = read_buffer(&mut b).await.expect("read");
        assert_eq!(decoded, buf);
    }

    #[tokio::test]
    async fn empty_buffer_round_trips_over_a_stream() {
        let (mut a, mut b) = duplex(64);
        let buf = MessageBuffer::new();
        write_buffer(&mut a, &buf).await.expect("write");
        let decoded = read_buffer(&mut b).await.expect("read");
        assert_eq!(decoded, buf);
    }
}
