//! Worker liveness probing.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Answers "is something listening on this port?".
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_in_use(&self, host: &str, port: u16) -> bool;
}

/// Probe by opening a TCP connection, bounded by a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_in_use(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}
