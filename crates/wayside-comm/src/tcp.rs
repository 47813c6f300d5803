// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! TCP messenger.
//!
//! Connects with a timeout, disables Nagle's algorithm, and resolves host
//! names on every open so a controller whose address changed is found again
//! after a reconnect.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use wayside_core::{CommError, CommResult, Messenger, TransportState};

use crate::stream;

/// Settings of a TCP link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSettings {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connect deadline.
    pub connect_timeout: Duration,
    /// Write deadline.
    pub write_timeout: Duration,
    /// Whether to set `TCP_NODELAY`.
    pub nodelay: bool,
}

impl TcpSettings {
    /// Creates settings with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            nodelay: true,
        }
    }

    /// Sets the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns `host:port`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A messenger over one TCP connection.
#[derive(Debug)]
pub struct TcpMessenger {
    settings: TcpSettings,
    stream: Option<TcpStream>,
    state: TransportState,
}

impl TcpMessenger {
    /// Creates a closed messenger.
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            settings,
            stream: None,
            state: TransportState::Disconnected,
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    async fn resolve(&self) -> CommResult<SocketAddr> {
        let addr = self.settings.socket_addr();
        if let Ok(parsed) = addr.parse::<SocketAddr>() {
            return Ok(parsed);
        }
        let mut addrs = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| CommError::connection_failed_with(format!("cannot resolve {}", addr), e))?;
        addrs
            .next()
            .ok_or_else(|| CommError::connection_failed(format!("no address for {}", addr)))
    }

    fn stream(&mut self) -> CommResult<&mut TcpStream> {
        self.stream.as_mut().ok_or(CommError::NotConnected)
    }

    fn mark<T>(&mut self, result: CommResult<T>) -> CommResult<T> {
        if let Err(ref e) = result {
            if e.requires_reconnect() {
                self.state = TransportState::Error;
            }
        }
        result
    }
}

#[async_trait]
impl Messenger for TcpMessenger {
    fn display_name(&self) -> String {
        format!("tcp://{}", self.settings.socket_addr())
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn open(&mut self) -> CommResult<()> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.state = TransportState::Connecting;

        let result = async {
            let addr = self.resolve().await?;
            let stream = timeout(self.settings.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    CommError::connection_failed(format!(
                        "connect to {} timed out after {:?}",
                        addr, self.settings.connect_timeout
                    ))
                })?
                .map_err(|e| CommError::connection_failed_with(format!("connect to {} failed", addr), e))?;
            stream.set_nodelay(self.settings.nodelay).ok();
            Ok::<_, CommError>(stream)
        }
        .await;

        match result {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = TransportState::Connected;
                tracing::debug!(addr = %self.settings.socket_addr(), "TCP connected");
                Ok(())
            }
            Err(e) => {
                self.state = TransportState::Error;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.state = TransportState::Disconnected;
    }

    async fn write(&mut self, bytes: &[u8]) -> CommResult<()> {
        let deadline = self.settings.write_timeout;
        let result = match self.stream() {
            Ok(s) => stream::write_all(s, bytes, deadline).await,
            Err(e) => Err(e),
        };
        self.mark(result)
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CommResult<usize> {
        let result = match self.stream() {
            Ok(s) => stream::read_some(s, buf, timeout).await,
            Err(e) => Err(e),
        };
        self.mark(result)
    }

    async fn discard_input(&mut self) -> CommResult<()> {
        let result = match self.stream() {
            Ok(s) => stream::drain(s).await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.mark(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_exchange_with_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut messenger = TcpMessenger::new(TcpSettings::new("127.0.0.1", port));
        assert_eq!(messenger.state(), TransportState::Disconnected);
        messenger.open().await.unwrap();
        assert!(messenger.is_open());

        messenger.write(b"echo").await.unwrap();
        let bytes = wayside_core::messenger::read_exact(&mut messenger, 4, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bytes, b"echo".to_vec());

        server.await.unwrap();
        messenger.close().await;
        assert_eq!(messenger.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut messenger = TcpMessenger::new(TcpSettings::new("127.0.0.1", port));
        let err = messenger.open().await.unwrap_err();
        assert!(err.requires_reconnect());
        assert_eq!(messenger.state(), TransportState::Error);
    }

    #[tokio::test]
    async fn test_read_timeout_keeps_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(80)).await;
            socket.write_all(b"late").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(b"ok").await.unwrap();
            let mut buf = [0u8; 1];
            let _ = socket.read(&mut buf).await;
        });

        let mut messenger = TcpMessenger::new(TcpSettings::new("127.0.0.1", port));
        messenger.open().await.unwrap();
        let mut buf = [0u8; 8];
        let err = messenger.read(&mut buf, Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(messenger.state(), TransportState::Connected);

        tokio::time::sleep(Duration::from_millis(100)).await;
        messenger.discard_input().await.unwrap();
        let bytes = wayside_core::messenger::read_exact(&mut messenger, 2, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bytes, b"ok".to_vec());

        messenger.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_when_closed() {
        let mut messenger = TcpMessenger::new(TcpSettings::new("127.0.0.1", 1));
        let err = messenger.write(b"x").await.unwrap_err();
        assert!(matches!(err, CommError::NotConnected));
        assert_eq!(messenger.display_name(), "tcp://127.0.0.1:1");
    }
}
