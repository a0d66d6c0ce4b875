use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::Instrument;

use crate::mapping::ListenAddr;
use crate::relay::{self, Relay};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum BindError {
    #[error("address {0} is already in use")]
    AddressInUse(ListenAddr),

    #[error("cannot bind {addr}: {source}")]
    Other { addr: ListenAddr, source: io::Error },
}

impl BindError {
    fn new(addr: ListenAddr, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::AddrInUse => Self::AddressInUse(addr),
            _ => Self::Other { addr, source: e },
        }
    }
}

#[derive(Debug)]
struct Listener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Listening sockets of all mappings, one per listen address.
///
/// Every socket is owned by the accept loop task spawned for it. Dropping
/// that task closes the socket.
#[derive(Debug, Default)]
pub struct ListenerPool {
    listeners: HashMap<ListenAddr, Listener>,
}

impl ListenerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` and start handing accepted connections to `relay`.
    ///
    /// Returns the address the socket is actually bound on.
    pub async fn bind(&mut self, addr: ListenAddr, relay: Arc<Relay>) -> Result<SocketAddr, BindError> {
        if self.listeners.contains_key(&addr) {
            return Err(BindError::AddressInUse(addr));
        }

        let listener = TcpListener::bind(addr.socket_addr())
            .await
            .map_err(|e| BindError::new(addr, e))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::new(addr, e))?;

        let span = error_span!("listener", addr = %local_addr);
        let task = tokio::spawn(accept_loop(listener, relay).instrument(span));

        debug!("bound listener on {}", display!(local_addr));
        self.listeners.insert(addr, Listener { local_addr, task });
        Ok(local_addr)
    }

    /// Stop accepting on `addr` and close its socket.
    ///
    /// Connections accepted earlier keep being relayed. Returns `false` if
    /// nothing was bound on `addr`.
    pub async fn unbind(&mut self, addr: &ListenAddr) -> bool {
        let Some(listener) = self.listeners.remove(addr) else {
            return false;
        };

        listener.task.abort();
        let _ = listener.task.await;

        debug!("closed listener on {}", display!(listener.local_addr));
        true
    }

    pub async fn unbind_all(&mut self) {
        let addrs: Vec<ListenAddr> = self.listeners.keys().copied().collect();

        for addr in addrs {
            self.unbind(&addr).await;
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self, addr: &ListenAddr) -> Option<SocketAddr> {
        self.listeners.get(addr).map(|x| x.local_addr)
    }

    #[cfg(test)]
    pub fn is_bound(&self, addr: &ListenAddr) -> bool {
        self.listeners.contains_key(addr)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

async fn accept_loop(listener: TcpListener, relay: Arc<Relay>) {
    loop {
        let (conn, peer) = match listener.accept().await {
            Ok(x) => x,
            Err(e) => {
                warn!("failed to accept connection: {}", display!(e));
                sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        relay::spawn(Arc::clone(&relay), conn, peer);
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    async fn free_addr() -> ListenAddr {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().into()
    }

    fn relay_to(addr: SocketAddr) -> Arc<Relay> {
        Arc::new(Relay::new(addr.into(), Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn bind_then_unbind_allows_rebind() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = relay_to(upstream.local_addr().unwrap());

        let mut pool = ListenerPool::new();
        let addr = free_addr().await;

        pool.bind(addr, Arc::clone(&relay)).await.unwrap();
        assert!(pool.is_bound(&addr));

        assert!(pool.unbind(&addr).await);
        assert!(!pool.unbind(&addr).await);
        assert_eq!(pool.len(), 0);

        pool.bind(addr, relay).await.unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn address_in_use_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: ListenAddr = taken.local_addr().unwrap().into();

        let mut pool = ListenerPool::new();
        let err = pool.bind(addr, relay_to(addr.socket_addr())).await.unwrap_err();

        assert!(matches!(err, BindError::AddressInUse(x) if x == addr));
        assert!(!pool.is_bound(&addr));
    }

    #[tokio::test]
    async fn unbind_stops_new_connections_but_not_sessions() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut pool = ListenerPool::new();
        let addr = free_addr().await;
        let local = pool
            .bind(addr, relay_to(upstream.local_addr().unwrap()))
            .await
            .unwrap();

        let mut client = TcpStream::connect(local).await.unwrap();
        let (mut server, _) = upstream.accept().await.unwrap();

        pool.unbind(&addr).await;
        assert!(TcpStream::connect(local).await.is_err());

        client.write_all(b"still here").await.unwrap();
        let mut buf = [0u8; 10];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still here");
    }
}
