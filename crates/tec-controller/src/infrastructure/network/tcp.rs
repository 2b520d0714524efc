//! TCP transport used by the controller binary.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use super::connection_manager::{Link, LinkError, NetworkError, Transport};

/// How long one accept call waits for a pending client.
const ACCEPT_WAIT: Duration = Duration::from_millis(1);

pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })?;
        info!("listening for clients on {addr}");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept_incoming(&mut self) -> Result<Option<Box<dyn Link>>, NetworkError> {
        match timeout(ACCEPT_WAIT, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, "set_nodelay failed: {e}");
                }
                Ok(Some(Box::new(TcpLink {
                    stream,
                    peer,
                    connected: true,
                })))
            }
            Ok(Err(e)) => Err(NetworkError::Accept(e)),
            Err(_) => Ok(None),
        }
    }
}

pub struct TcpLink {
    stream: TcpStream,
    peer: SocketAddr,
    connected: bool,
}

#[async_trait]
impl Link for TcpLink {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.stream.try_read(buf) {
            Ok(0) => {
                self.connected = false;
                Err(LinkError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.connected = false;
                Err(LinkError::Io(e))
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(bytes).await.map_err(|e| {
            self.connected = false;
            LinkError::Io(e)
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        self.connected = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, "shutdown failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_bind_and_exchange_bytes() {
        // Arrange
        let mut transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Act
        let mut link = loop {
            if let Some(link) = transport.accept_incoming().await.unwrap() {
                break link;
            }
        };
        client.write_all(b"{\"A\":1}").await.unwrap();
        let mut buf = [0u8; 16];
        let mut n = 0;
        while n == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            n = link.read_available(&mut buf).unwrap();
        }
        link.send(b"{\"B\":2}\0").await.unwrap();
        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();

        // Assert
        assert_eq!(&buf[..n], b"{\"A\":1}");
        assert_eq!(&reply, b"{\"B\":2}\0");
    }

    #[tokio::test]
    async fn test_client_hangup_reports_closed() {
        let mut transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let mut link = loop {
            if let Some(link) = transport.accept_incoming().await.unwrap() {
                break link;
            }
        };

        drop(client);
        let mut buf = [0u8; 8];
        let result = loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            match link.read_available(&mut buf) {
                Ok(0) => continue,
                other => break other,
            }
        };

        assert!(matches!(result, Err(LinkError::Closed)));
        assert!(!link.is_connected());
    }
}
