use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    io,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

use crate::{DistributedStore, StoreEntry, StoreError};

/// Oldest write records are dropped past this many.
pub const MAX_WRITE_HISTORY: usize = 4096;

/// In-process [`DistributedStore`] shared by cloning.
///
/// Entries expire when their lease runs out and are dropped on the next write. A non-`latest`
/// read only sees writes older than the configured propagation delay, which is enough to
/// reproduce stale reads. Faults can be injected to exercise retry paths. The last
/// [`MAX_WRITE_HISTORY`] accepted writes are kept for inspection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    peers: BTreeSet<String>,
    propagation_delay: Duration,
    failing_reads: usize,
    failing_writes: usize,
    writes: VecDeque<WriteRecord>,
}

impl Inner {
    fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, slot| match slot {
            Slot::Value(record) => now < record.expires_at,
            Slot::Dictionary(records) => {
                records.retain(|_, record| now < record.expires_at);
                !records.is_empty()
            }
        });
    }

    fn record_write(&mut self, write: WriteRecord) {
        if self.writes.len() == MAX_WRITE_HISTORY {
            self.writes.pop_front();
        }
        self.writes.push_back(write);
    }
}

enum Slot {
    Value(Record),
    Dictionary(BTreeMap<String, Record>),
}

struct Record {
    value: Vec<u8>,
    written_at: Instant,
    expires_at: Instant,
}

impl Record {
    fn readable(&self, now: Instant, latest: bool, delay: Duration) -> bool {
        now < self.expires_at && (latest || now >= self.written_at + delay)
    }
}

/// One accepted write, in acceptance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub key: String,
    pub subkey: Option<String>,
    pub at: Instant,
}

fn injected_fault(op: &str) -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        format!("injected {op} failure"),
    ))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_propagation_delay(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                propagation_delay: delay,
                ..Default::default()
            })),
        }
    }

    pub async fn add_peer(&self, peer: impl Into<String>) {
        self.inner.lock().await.peers.insert(peer.into());
    }

    /// The next `n` reads (including peer listings) fail with a transient I/O error.
    pub async fn fail_next_reads(&self, n: usize) {
        self.inner.lock().await.failing_reads = n;
    }

    /// The next `n` writes fail with a transient I/O error.
    pub async fn fail_next_writes(&self, n: usize) {
        self.inner.lock().await.failing_writes = n;
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().await.writes.iter().cloned().collect()
    }

    pub async fn writes_to(&self, key: &str) -> Vec<WriteRecord> {
        self.inner
            .lock()
            .await
            .writes
            .iter()
            .filter(|w| w.key == key)
            .cloned()
            .collect()
    }

    /// Removes every expired record. Reads already ignore them.
    pub async fn purge_expired(&self) {
        self.inner.lock().await.purge(Instant::now());
    }
}

#[async_trait]
impl DistributedStore for MemoryStore {
    async fn get(&self, key: &str, latest: bool) -> Result<Option<StoreEntry>, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            return Err(injected_fault("read"));
        }
        let now = Instant::now();
        let delay = inner.propagation_delay;
        let entry = match inner.entries.get(key) {
            None => None,
            Some(Slot::Value(record)) => record
                .readable(now, latest, delay)
                .then(|| StoreEntry::Value(record.value.clone())),
            Some(Slot::Dictionary(records)) => {
                let live: BTreeMap<String, Vec<u8>> = records
                    .iter()
                    .filter(|(_, record)| record.readable(now, latest, delay))
                    .map(|(subkey, record)| (subkey.clone(), record.value.clone()))
                    .collect();
                (!live.is_empty()).then_some(StoreEntry::Dictionary(live))
            }
        };
        trace!(key, latest, found = entry.is_some(), "memory store get");
        Ok(entry)
    }

    async fn store(
        &self,
        key: &str,
        subkey: Option<&str>,
        value: Vec<u8>,
        lease: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(injected_fault("write"));
        }
        let now = Instant::now();
        inner.purge(now);
        let record = Record {
            value,
            written_at: now,
            expires_at: now + lease,
        };
        match subkey {
            None => {
                inner.entries.insert(key.to_string(), Slot::Value(record));
            }
            Some(subkey) => {
                let slot = inner
                    .entries
                    .entry(key.to_string())
                    .or_insert_with(|| Slot::Dictionary(BTreeMap::new()));
                // a subkey write turns a plain value into a dictionary
                if let Slot::Value(_) = slot {
                    *slot = Slot::Dictionary(BTreeMap::new());
                }
                if let Slot::Dictionary(records) = slot {
                    records.insert(subkey.to_string(), record);
                }
            }
        }
        inner.record_write(WriteRecord {
            key: key.to_string(),
            subkey: subkey.map(str::to_string),
            at: now,
        });
        trace!(key, subkey, "memory store write");
        Ok(())
    }

    async fn visible_peers(&self, _latest: bool) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            return Err(injected_fault("peer listing"));
        }
        Ok(inner.peers.iter().cloned().collect())
    }
}
