use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use thiserror::Error;
use tokio::net::{TcpStream, lookup_host};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Instrument;

use crate::mapping::ForwardAddr;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("cannot reach {addr}: {source}")]
    ForwardUnreachable { addr: ForwardAddr, source: io::Error },

    #[error("{0} points back at the listener")]
    Loop(ForwardAddr),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Forwards accepted connections of one mapping to its destination.
#[derive(Debug)]
pub struct Relay {
    forward: ForwardAddr,
    connect_timeout: Duration,
}

impl Relay {
    pub fn new(forward: ForwardAddr, connect_timeout: Duration) -> Self {
        Self {
            forward,
            connect_timeout,
        }
    }

    fn unreachable(&self, source: io::Error) -> RelayError {
        RelayError::ForwardUnreachable {
            addr: self.forward.clone(),
            source,
        }
    }

    // Addresses equal to `local` are skipped, dialling them would make the
    // listener accept its own connection.
    async fn connect(&self, local: SocketAddr) -> Result<TcpStream, RelayError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.forward.host(), self.forward.port()))
            .await
            .map_err(|e| self.unreachable(e))?
            .collect();

        if !addrs.is_empty() && addrs.iter().all(|x| *x == local) {
            return Err(RelayError::Loop(self.forward.clone()));
        }

        let mut last_error = None;

        for addr in addrs.into_iter().filter(|x| *x != local) {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(s)) => return Ok(s),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => last_error = Some(io::Error::from(io::ErrorKind::TimedOut)),
            }
        }

        let e = last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"));
        Err(self.unreachable(e))
    }

    /// Relay `conn` until both directions are finished.
    ///
    /// Returns the number of bytes sent to and received from the
    /// destination. Both sockets are closed when this returns.
    pub async fn run(&self, conn: TcpStream) -> Result<(u64, u64), RelayError> {
        let mut a = conn;
        let mut b = self.connect(a.local_addr()?).await?;

        debug!("{} to {}", "connected".bright_green(), display!(self.forward));

        let n = tokio::io::copy_bidirectional(&mut a, &mut b).await?;
        Ok(n)
    }
}

/// Run a relay session for `conn` in its own task.
///
/// Failures are logged and only ever affect this one connection.
pub fn spawn(relay: Arc<Relay>, conn: TcpStream, peer: SocketAddr) -> JoinHandle<()> {
    let span = error_span!("relay", from = %peer, to = %relay.forward);

    tokio::spawn(
        async move {
            info!("connected");

            match relay.run(conn).await {
                Ok((tx, rx)) => info!(tx, rx, "disconnected"),
                Err(e @ (RelayError::ForwardUnreachable { .. } | RelayError::Loop(_))) => {
                    warn!("{e}");
                }
                Err(RelayError::Io(e)) => debug!("disconnected: {}", display!(e)),
            }
        }
        .instrument(span),
    )
}
