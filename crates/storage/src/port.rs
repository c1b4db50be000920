//! Storage ports: the abstract interface the rest of the system programs
//! against, independent of the embedded backend.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Logical namespace within one backend instance. `System` holds node
/// identity and is never partitioned; `Data`/`Index`/`Meta` hold
/// per-partition versioned records, with the partition keyspace prefix
/// embedded directly in the key bytes by `crate::codec`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Table {
    System,
    Data,
    Index,
    Meta,
}

/// A single write as part of an atomic batch.
pub struct WriteOp {
    pub table: Table,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WriteOp {
    pub fn new(table: Table, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            table,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Abstract key-value backend. Implementations must make `put_batch`
/// atomic: either every write in the batch is visible, or none are.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn put_batch(&self, writes: Vec<WriteOp>) -> Result<()>;

    /// Scan `table` in lexicographic (or reverse) key order, starting at
    /// `start` (inclusive) and stopping before `end` (exclusive) if
    /// given, yielding at most `limit` entries if given. Implementations
    /// should fetch in bounded batches internally rather than holding a
    /// single long-lived transaction, so large scans don't block other
    /// work for long.
    async fn scan(
        &self,
        table: Table,
        start: Vec<u8>,
        end: Option<Vec<u8>>,
        reverse: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Factory producing independent `Storage` instances keyed by an
/// environment index (`PartitionedStorage` maps partitions onto a
/// bounded number of these).
#[async_trait]
pub trait StorageFactory: Send + Sync {
    /// Maximum number of keyspaces/environments this factory supports.
    /// Implementations without a hard limit may return a large
    /// constant.
    fn max_keyspaces(&self) -> u64;

    async fn get(&self, env_index: u64) -> Result<Arc<dyn Storage>>;

    async fn close(&self) -> Result<()>;
}
