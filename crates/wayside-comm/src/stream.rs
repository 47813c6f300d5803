// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Deadline-bounded I/O over async byte streams.
//!
//! Shared by every messenger: sockets, serial ports, and modem lines all
//! reduce to an [`IoStream`].

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use wayside_core::{CommError, CommResult};

/// A duplex async byte stream.
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// Reads at least one byte within `deadline`.
///
/// End of stream is reported as a read failure.
pub async fn read_some<S>(stream: &mut S, buf: &mut [u8], deadline: Duration) -> CommResult<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    match timeout(deadline, stream.read(buf)).await {
        Ok(Ok(0)) => Err(CommError::read_failed("stream closed by peer")),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(map_read_error(e)),
        Err(_) => Err(CommError::timeout(deadline)),
    }
}

/// Writes every byte and flushes.
pub async fn write_all<S>(stream: &mut S, bytes: &[u8], deadline: Duration) -> CommResult<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match timeout(deadline, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CommError::write_failed_with("write failed", e)),
        Err(_) => Err(CommError::timeout(deadline)),
    }
}

/// Discards bytes that are already buffered, without waiting for more.
///
/// Returns the number of bytes discarded.
pub async fn drain<S>(stream: &mut S) -> CommResult<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; 256];
    let mut total = 0;
    loop {
        match timeout(Duration::ZERO, stream.read(&mut scratch)).await {
            Ok(Ok(0)) => return Err(CommError::read_failed("stream closed by peer")),
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) => return Err(map_read_error(e)),
            Err(_) => return Ok(total),
        }
    }
}

fn map_read_error(e: io::Error) -> CommError {
    match e.kind() {
        io::ErrorKind::TimedOut => CommError::read_failed_with("read timed out", e),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
            CommError::read_failed_with("connection lost", e)
        }
        _ => CommError::read_failed_with("read failed", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_write_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_all(&mut a, b"ping", Duration::from_secs(1)).await.unwrap();

        let mut buf = [0u8; 16];
        let n = read_some(&mut b, &mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_read_timeout_and_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut buf = [0u8; 4];
        let err = read_some(&mut b, &mut buf, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        drop(a);
        let err = read_some(&mut b, &mut buf, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "read_failed");
    }

    #[tokio::test]
    async fn test_drain_discards_buffered() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"stale bytes").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(drain(&mut b).await.unwrap(), 11);
        assert_eq!(drain(&mut b).await.unwrap(), 0);
    }
}
