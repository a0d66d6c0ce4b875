use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::forward::Forward;
use crate::config::{Config, Store};
use crate::mapping::{ForwardAddr, ListenAddr, Mapping, MappingState, MappingType};
use crate::pool::{BindError, ListenerPool};
use crate::relay::Relay;
use crate::table::{MappingTable, TableError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("a mapping for {0} already exists")]
    Conflict(ListenAddr),

    #[error("no {1} mapping for {0}")]
    NotFound(ListenAddr, MappingType),

    #[error(transparent)]
    Bind(#[from] BindError),
}

impl From<TableError> for ControlError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Conflict(addr) => Self::Conflict(addr),
            TableError::NotFound(addr, ty) => Self::NotFound(addr, ty),
        }
    }
}

/// Store contents taken after a mutation, numbered in mutation order.
#[derive(Debug)]
struct Snapshot {
    generation: u64,
    config: Config,
}

/// Keeps the mapping table and the listening sockets in agreement.
///
/// Adds and deletes are serialized by the lock around the listener pool, so
/// a table entry and its listener always appear and disappear together.
/// Queries only read the table and never wait for that lock. The store is
/// written after the pool lock is released.
#[derive(Debug)]
pub struct Controller {
    table: MappingTable,
    pool: Mutex<ListenerPool>,
    store: Option<Store>,
    connect_timeout: Duration,

    generation: AtomicU64,
    saved: Mutex<u64>,
}

impl Controller {
    pub fn new(connect_timeout: Duration, store: Option<Store>) -> Self {
        Self {
            table: MappingTable::new(),
            pool: Mutex::new(ListenerPool::new()),
            store,
            connect_timeout,
            generation: AtomicU64::new(0),
            saved: Mutex::new(0),
        }
    }

    // Leaves the entry in `Starting` if the bind fails, the caller decides
    // whether to roll it back or keep it as failed.
    async fn start(
        &self,
        pool: &mut ListenerPool,
        listen_addr: ListenAddr,
        forward_addr: ForwardAddr,
        mapping_type: MappingType,
        persist: bool,
    ) -> Result<Mapping, ControlError> {
        self.table
            .insert(listen_addr, forward_addr.clone(), mapping_type, persist)?;

        let relay = Arc::new(Relay::new(forward_addr, self.connect_timeout));
        pool.bind(listen_addr, relay).await?;

        let mapping = self
            .table
            .set_state(listen_addr, mapping_type, MappingState::Active)?;
        Ok(mapping)
    }

    /// Create a mapping and start forwarding it.
    ///
    /// Either both the table entry and the listener exist afterwards, or
    /// neither does.
    pub async fn add(
        &self,
        listen_addr: ListenAddr,
        forward_addr: ForwardAddr,
        mapping_type: MappingType,
        persist: bool,
    ) -> Result<Mapping, ControlError> {
        let mut pool = self.pool.lock().await;

        let mapping = match self
            .start(&mut pool, listen_addr, forward_addr, mapping_type, persist)
            .await
        {
            Ok(x) => x,

            Err(ControlError::Bind(e)) => {
                let rolled_back = self.table.remove(listen_addr, mapping_type);
                debug_assert!(
                    rolled_back.is_ok(),
                    "entry for {listen_addr} vanished while the pool was locked"
                );
                return Err(ControlError::Bind(e));
            }

            Err(e) => return Err(e),
        };

        info!("forwarding {}", display!(mapping));

        let snapshot = self.snapshot(&mapping);
        drop(pool);

        self.save(snapshot).await;
        Ok(mapping)
    }

    /// Stop forwarding a mapping and remove it.
    ///
    /// Connections accepted before the call are left to finish on their own.
    pub async fn delete(
        &self,
        listen_addr: ListenAddr,
        mapping_type: MappingType,
    ) -> Result<Mapping, ControlError> {
        let mut pool = self.pool.lock().await;

        self.table
            .set_state(listen_addr, mapping_type, MappingState::Stopping)?;

        if !pool.unbind(&listen_addr).await {
            debug!("no listener was bound on {}", display!(listen_addr));
        }

        let mapping = self.table.remove(listen_addr, mapping_type)?;
        info!("removed {}", display!(mapping));

        let snapshot = self.snapshot(&mapping);
        drop(pool);

        self.save(snapshot).await;
        Ok(mapping)
    }

    /// Every mapping with its current state, in the order they were added.
    pub fn query(&self) -> Vec<Mapping> {
        self.table.list()
    }

    /// Start the mappings read from the store.
    ///
    /// Mappings that cannot be bound stay in the table as
    /// [`Failed`](MappingState::Failed).
    pub async fn restore(&self, config: Config) {
        let mut pool = self.pool.lock().await;

        for x in config.forward {
            let Forward {
                listen,
                to,
                mapping_type,
            } = x;

            match self.start(&mut pool, listen, to, mapping_type, true).await {
                Ok(mapping) => info!("forwarding {}", display!(mapping)),

                Err(ControlError::Bind(e)) => {
                    error!("{e}");
                    let failed = self
                        .table
                        .set_state(listen, mapping_type, MappingState::Failed);
                    debug_assert!(failed.is_ok());
                }

                Err(e) => warn!("skipping stored mapping: {e}"),
            }
        }
    }

    /// Close every listener.
    pub async fn shutdown(&self) {
        let mut pool = self.pool.lock().await;
        pool.unbind_all().await;
    }

    #[cfg(test)]
    pub async fn local_addr(&self, listen_addr: &ListenAddr) -> Option<std::net::SocketAddr> {
        self.pool.lock().await.local_addr(listen_addr)
    }

    // Must be called with the pool lock held, so generations follow the
    // order of mutations.
    fn snapshot(&self, changed: &Mapping) -> Option<Snapshot> {
        if !changed.persist || self.store.is_none() {
            return None;
        }

        let config = Config {
            forward: self
                .table
                .list()
                .iter()
                .filter(|x| x.persist)
                .map(Forward::from)
                .collect(),
        };

        Some(Snapshot {
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            config,
        })
    }

    // A snapshot older than the one last written is dropped.
    async fn save(&self, snapshot: Option<Snapshot>) {
        let (Some(store), Some(snapshot)) = (&self.store, snapshot) else {
            return;
        };

        let mut saved = self.saved.lock().await;
        if snapshot.generation <= *saved {
            debug!("skipping stale save #{}", snapshot.generation);
            return;
        }

        if let Err(e) = store.save(&snapshot.config).await {
            warn!("cannot save mappings: {e:#}");
        }

        *saved = snapshot.generation;
    }
}
