use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;

use crate::StoreError;

/// What a read returns for a key: either the single value written without a subkey, or every
/// live subkey written under it.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEntry {
    Value(Vec<u8>),
    Dictionary(BTreeMap<String, Vec<u8>>),
}

/// An eventually-consistent key/subkey store where every write carries a lease.
///
/// Reads may miss or return stale data after a successful write elsewhere. Nothing here
/// is transactional; callers partition keys so that each one has a single writer.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// `latest` asks the store to look past locally cached replicas for the newest value.
    async fn get(&self, key: &str, latest: bool) -> Result<Option<StoreEntry>, StoreError>;

    /// Writes `value` under `key`, or under `subkey` of `key`'s dictionary. The entry may
    /// disappear once `lease` elapses.
    async fn store(
        &self,
        key: &str,
        subkey: Option<&str>,
        value: Vec<u8>,
        lease: Duration,
    ) -> Result<(), StoreError>;

    /// Peers currently reachable through the store. Only used as a liveness check.
    async fn visible_peers(&self, latest: bool) -> Result<Vec<String>, StoreError>;
}
