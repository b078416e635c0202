//! Wire framer: reads and writes length-prefixed typed frames.
//!
//! Frames are `tag:u8, len:i32 (inclusive of itself), payload`. The framer
//! never looks inside payloads. Startup messages carry no tag byte and go
//! through [`read_startup_message`]. Any violation here is a [`FrameError`];
//! the session terminates without attempting an ErrorResponse.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, FrameError};

/// Hard ceiling on a single frame, matching what a reasonable client would
/// ever send. Configurable per-session ceilings may be lower, never higher.
pub const MAX_MESSAGE_SIZE: i32 = 256 * 1024 * 1024;

/// Read one complete tagged frame. The returned buffer holds the tag byte at
/// index 0 followed by the four length bytes and the payload, exactly as they
/// appeared on the wire.
pub async fn read_message<S>(stream: &mut S, max_size: i32) -> Result<BytesMut, Error>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ClientDisconnected)
        }
        Err(err) => return Err(Error::SocketRead(err)),
    }

    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 {
        return Err(FrameError::LenBelowMinimum(len).into());
    }
    if len > max_size {
        return Err(FrameError::TooLarge { len, max: max_size }.into());
    }

    let mut message = BytesMut::with_capacity(1 + len as usize);
    message.put_slice(&header);
    message.resize(1 + len as usize, 0);
    match stream.read_exact(&mut message[5..]).await {
        Ok(_) => Ok(message),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FrameError::UnexpectedEof.into())
        }
        Err(err) => Err(Error::SocketRead(err)),
    }
}

/// Read a startup-phase message (no tag byte). Returns the payload after the
/// length word: protocol code followed by parameter bytes.
pub async fn read_startup_message<S>(stream: &mut S, max_size: i32) -> Result<BytesMut, Error>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ClientDisconnected)
        }
        Err(err) => return Err(Error::SocketRead(err)),
    }

    let len = i32::from_be_bytes(len_buf);
    if len < 8 || len > max_size {
        return Err(FrameError::BadStartupLen(len).into());
    }

    let mut payload = BytesMut::new();
    payload.resize(len as usize - 4, 0);
    match stream.read_exact(&mut payload[..]).await {
        Ok(_) => Ok(payload),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FrameError::UnexpectedEof.into())
        }
        Err(err) => Err(Error::SocketRead(err)),
    }
}

/// Write without flushing. The caller decides when a group of frames is
/// complete enough to hit the socket.
pub async fn write_all<S>(stream: &mut S, buf: &BytesMut) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(buf).await.map_err(Error::SocketWrite)
}

/// Write and flush in one step.
pub async fn write_all_flush<S>(stream: &mut S, buf: &[u8]) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(buf).await.map_err(Error::SocketWrite)?;
    stream.flush().await.map_err(Error::SocketFlush)
}

/// Flush previously buffered writes.
pub async fn flush<S>(stream: &mut S) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    stream.flush().await.map_err(Error::SocketFlush)
}
