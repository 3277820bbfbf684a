//! Bus connection pool, at most one idle connection per proxy address.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::bus::Bus;

/// Any duplex byte stream a bus can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens connections to proxy addresses.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<BoxedStream>;
}

/// Plain TCP with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        TcpDialer { connect_timeout }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxedStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr} timed out")))??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

pub type PooledBus = Bus<BoxedStream>;

/// Reusable bus connections keyed by proxy address.
///
/// A connection is taken out of the pool for the duration of one exchange
/// and handed back only if the exchange left it intact.
pub struct ConnectionPool {
    dialer: Arc<dyn Dialer>,
    max_frame_size: usize,
    idle: Mutex<HashMap<String, PooledBus>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_frame_size", &self.max_frame_size)
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    pub fn new(dialer: Arc<dyn Dialer>, max_frame_size: usize) -> Self {
        ConnectionPool {
            dialer,
            max_frame_size,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Take the idle connection to `addr` out of the pool. The peer may have
    /// closed it since it was released.
    pub fn take_idle(&self, addr: &str) -> Option<PooledBus> {
        self.idle.lock().remove(addr)
    }

    /// Open a fresh connection to `addr`.
    pub async fn dial(&self, addr: &str) -> io::Result<PooledBus> {
        debug!(proxy = addr, "bus_connecting");
        let stream = self.dialer.dial(addr).await?;
        Ok(Bus::with_max_frame_size(stream, self.max_frame_size))
    }

    /// Return a connection after a completed exchange. Broken connections
    /// are dropped.
    pub fn release(&self, addr: &str, bus: PooledBus) {
        if bus.is_broken() {
            return;
        }
        self.idle.lock().insert(addr.to_string(), bus);
    }

    /// Close the idle connection to `addr`, if any.
    pub fn discard(&self, addr: &str) {
        if self.idle.lock().remove(addr).is_some() {
            debug!(proxy = addr, "bus_discarded");
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}
