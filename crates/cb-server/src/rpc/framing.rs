//! Frame codec for RPC streams.
//!
//! A frame is a big-endian `u32` byte count followed by exactly that many
//! bytes of UTF-8 JSON. Both directions enforce the same size limit.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Default maximum frame size (16 MiB).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds max of {max}")]
    Oversize { len: usize, max: usize },

    #[error("stream ended inside a frame ({read} of {expected} bytes)")]
    Truncated { expected: usize, read: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read one frame.
///
/// `Ok(None)` means the stream ended cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        match reader.read(&mut prefix[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(FrameError::Truncated {
                    expected: PREFIX_LEN,
                    read: filled,
                })
            }
            n => filled += n,
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_bytes {
        return Err(FrameError::Oversize {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len];
    let mut read = 0;
    while read < len {
        match reader.read(&mut payload[read..]).await? {
            0 => return Err(FrameError::Truncated { expected: len, read }),
            n => read += n,
        }
    }
    trace!(len, "frame received");
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_bytes: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len();
    let prefix = u32::try_from(len)
        .ok()
        .filter(|_| len <= max_frame_bytes)
        .ok_or(FrameError::Oversize {
            len,
            max: max_frame_bytes,
        })?;

    writer.write_u32(prefix).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    trace!(len, "frame sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn consecutive_frames_keep_their_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let write_task = tokio::spawn(async move {
            write_frame(&mut client, br#"{"a":1}"#, MAX_FRAME_BYTES).await?;
            write_frame(&mut client, b"", MAX_FRAME_BYTES).await?;
            write_frame(&mut client, br#"{"b":2}"#, MAX_FRAME_BYTES).await
        });

        let first = read_frame(&mut server, MAX_FRAME_BYTES).await.unwrap();
        let empty = read_frame(&mut server, MAX_FRAME_BYTES).await.unwrap();
        let second = read_frame(&mut server, MAX_FRAME_BYTES).await.unwrap();
        write_task.await.unwrap().unwrap();

        assert_eq!(first, Some(br#"{"a":1}"#.to_vec()));
        assert_eq!(empty, Some(Vec::new()));
        assert_eq!(second, Some(br#"{"b":2}"#.to_vec()));
    }

    #[tokio::test]
    async fn length_prefix_is_big_endian() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hi", MAX_FRAME_BYTES).await.unwrap();
        drop(client);

        let mut raw = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut raw).await.unwrap();
        assert_eq!(raw, [0, 0, 0, 2, b'h', b'i']);
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        assert_eq!(read_frame(&mut server, MAX_FRAME_BYTES).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected_before_reading_payload() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        client.write_all(&1025u32.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversize { len: 1025, max: 1024 }));
    }

    #[tokio::test]
    async fn oversize_payload_is_not_written() {
        let (mut client, _server) = tokio::io::duplex(64 * 1024);
        let err = write_frame(&mut client, &[0u8; 32], 16).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversize { len: 32, max: 16 }));
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_truncation() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server, MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 10, read: 3 }));

        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server, MAX_FRAME_BYTES).await.unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 4, read: 2 }));
    }
}
