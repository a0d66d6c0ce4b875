use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::mapping::{ForwardAddr, ListenAddr, Mapping, MappingState, MappingType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("a mapping for {0} already exists")]
    Conflict(ListenAddr),

    #[error("no {1} mapping for {0}")]
    NotFound(ListenAddr, MappingType),
}

/// The authoritative set of mappings, keyed by listen address and kept in
/// insertion order.
///
/// The table does not touch sockets. Keeping it consistent with the
/// listeners is up to [`Controller`](crate::controller::Controller).
#[derive(Debug, Default)]
pub struct MappingTable {
    entries: RwLock<Vec<Mapping>>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Mapping>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Mapping>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new mapping in the [`Starting`](MappingState::Starting) state.
    pub fn insert(
        &self,
        listen_addr: ListenAddr,
        forward_addr: ForwardAddr,
        mapping_type: MappingType,
        persist: bool,
    ) -> Result<Mapping, TableError> {
        let mut entries = self.write();

        if entries.iter().any(|x| x.listen_addr == listen_addr) {
            return Err(TableError::Conflict(listen_addr));
        }

        let mapping = Mapping {
            listen_addr,
            forward_addr,
            mapping_type,
            state: MappingState::Starting,
            persist,
        };

        entries.push(mapping.clone());
        Ok(mapping)
    }

    /// Remove the mapping matching both `listen_addr` and `mapping_type`.
    pub fn remove(
        &self,
        listen_addr: ListenAddr,
        mapping_type: MappingType,
    ) -> Result<Mapping, TableError> {
        let mut entries = self.write();

        let i = entries
            .iter()
            .position(|x| x.listen_addr == listen_addr && x.mapping_type == mapping_type)
            .ok_or(TableError::NotFound(listen_addr, mapping_type))?;

        Ok(entries.remove(i))
    }

    pub fn set_state(
        &self,
        listen_addr: ListenAddr,
        mapping_type: MappingType,
        state: MappingState,
    ) -> Result<Mapping, TableError> {
        let mut entries = self.write();

        let entry = entries
            .iter_mut()
            .find(|x| x.listen_addr == listen_addr && x.mapping_type == mapping_type)
            .ok_or(TableError::NotFound(listen_addr, mapping_type))?;

        entry.state = state;
        Ok(entry.clone())
    }

    /// Snapshot of every mapping in insertion order.
    pub fn list(&self) -> Vec<Mapping> {
        self.read().clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }
}
