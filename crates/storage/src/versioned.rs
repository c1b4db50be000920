//! Multi-version key-value storage on top of a raw `Storage` backend.
//!
//! Every store owns exactly one HLC; mutations are serialized by
//! `hlc_lock` because the clock "forms a per-store monotonic timeline"
//! and must never be shared or raced across concurrent `put`s.

use crate::codec::{self, SENTINEL, TOMBSTONE};
use crate::error::{Error, Result};
use crate::port::{Storage, Table, WriteOp};
use corelib::hlc::{Hlc, LwwResolver};
use corelib::node::NodeId;
use dashmap::DashMap;
use tokio::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

const HLC_META_KEY_SUFFIX: &[u8] = b"\x00hlc";

fn meta_hlc_key(keyspace: &[u8]) -> Vec<u8> {
    let mut key = keyspace.to_vec();
    key.extend_from_slice(HLC_META_KEY_SUFFIX);
    key
}

/// A single logical partition's versioned key-value view over a shared
/// raw backend. Many `VersionedStorage`s may point at the same `Storage`
/// (same redb file) while each tracks its own HLC.
pub struct VersionedStorage {
    inner: Arc<dyn Storage>,
    keyspace: Vec<u8>,
    hlc: Mutex<Hlc>,
}

impl VersionedStorage {
    /// Load the persisted HLC for `keyspace`, or bootstrap from
    /// `Hlc::initial` if this partition has never been written to.
    pub async fn load(inner: Arc<dyn Storage>, keyspace: Vec<u8>, node_id: NodeId) -> Result<Self> {
        let hlc = match inner.get(Table::Meta, &meta_hlc_key(&keyspace)).await? {
            Some(bytes) => rmp_serde::from_slice(&bytes)
                .map_err(|e| Error::Serialization(e.to_string()))?,
            None => Hlc::initial(node_id),
        };
        Ok(Self {
            inner,
            keyspace,
            hlc: Mutex::new(hlc),
        })
    }

    pub fn keyspace(&self) -> &[u8] {
        &self.keyspace
    }

    fn keyspace_upper_bound(&self) -> Option<Vec<u8>> {
        codec::successor(&self.keyspace)
    }

    /// Reverse-iterate `data` with prefix `data_prefix(keyspace, key)`,
    /// limit 1. Absent or tombstoned returns `None`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.latest_version(key).await? {
            Some((_, value)) if value != TOMBSTONE => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn latest_version(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let prefix = codec::data_prefix(&self.keyspace, key);
        let end = codec::successor(&prefix);
        let mut rows = self
            .inner
            .scan(Table::Data, prefix, end, true, Some(1))
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let (data_key, value) = rows.remove(0);
        let (hlc_bytes, _) = codec::parse_data_key(&self.keyspace, &data_key)?;
        Ok(Some((hlc_bytes, value)))
    }

    /// `put(keyspace, key, value)`: tick the local clock, then write
    /// `data`, `index`, and the new `meta` HLC atomically.
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<Hlc> {
        self.put_many(std::iter::once((key.to_vec(), value.to_vec())))
            .await
    }

    pub async fn delete(&self, key: &[u8]) -> Result<Hlc> {
        self.put(key, TOMBSTONE).await
    }

    /// `put_many`: one atomic batch for all items; each item ticks the
    /// store's HLC forward in order.
    pub async fn put_many(
        &self,
        items: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<Hlc> {
        let mut guard = self.hlc.lock().await;
        let mut writes = Vec::new();
        let mut current = guard.clone();

        for (key, value) in items {
            current = current.tick_local(now_ms());
            let hlc_bytes = current.encode();
            writes.push(WriteOp::new(
                Table::Data,
                codec::data_key(&self.keyspace, &key, &hlc_bytes),
                value,
            ));
            writes.push(WriteOp::new(
                Table::Index,
                codec::index_key(&self.keyspace, &hlc_bytes, &key),
                SENTINEL.to_vec(),
            ));
        }

        let meta_bytes =
            rmp_serde::to_vec(&current).map_err(|e| Error::Serialization(e.to_string()))?;
        writes.push(WriteOp::new(
            Table::Meta,
            meta_hlc_key(&self.keyspace),
            meta_bytes,
        ));

        self.inner.put_batch(writes).await?;
        *guard = current.clone();
        Ok(current)
    }

    /// Scan `index` in lexicographic (or reverse) order, resolving each
    /// entry's `user_key`/`value`. Corrupted or truncated entries are
    /// skipped rather than failing the whole scan.
    pub async fn iter(
        &self,
        start: Option<Vec<u8>>,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = start.unwrap_or_else(|| self.keyspace.clone());
        let end = self.keyspace_upper_bound();
        let entries = self
            .inner
            .scan(Table::Index, start, end, reverse, limit)
            .await?;

        let mut out = Vec::with_capacity(entries.len());
        for (index_key, _sentinel) in entries {
            let Ok((hlc_bytes, user_key)) = codec::parse_index_key(&self.keyspace, &index_key)
            else {
                continue;
            };
            let data_key = codec::data_key(&self.keyspace, &user_key, &hlc_bytes);
            let Ok(Some(value)) = self.inner.get(Table::Data, &data_key).await else {
                continue;
            };
            out.push((user_key, value));
        }
        Ok(out)
    }

    /// Stream changes strictly after `hlc_bytes` in ascending HLC order,
    /// used by anti-entropy.
    pub async fn iter_from_hlc(
        &self,
        hlc_bytes: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>> {
        let start = codec::index_prefix(&self.keyspace, hlc_bytes);
        let end = self.keyspace_upper_bound();
        let entries = self
            .inner
            .scan(Table::Index, start, end, false, limit)
            .await?;

        let mut out = Vec::with_capacity(entries.len());
        for (index_key, _sentinel) in entries {
            let Ok((hlc_bytes, user_key)) = codec::parse_index_key(&self.keyspace, &index_key)
            else {
                continue;
            };
            let data_key = codec::data_key(&self.keyspace, &user_key, &hlc_bytes);
            let Ok(Some(value)) = self.inner.get(Table::Data, &data_key).await else {
                continue;
            };
            out.push((index_key, user_key, value));
        }
        Ok(out)
    }

    /// Apply a remote `(index_key, value)` triple, merging the local
    /// clock and resolving the winner via last-writer-wins.
    pub async fn apply_remote(&self, index_key: &[u8], value: &[u8]) -> Result<Hlc> {
        let (r_hlc_bytes, user_key) = codec::parse_index_key(&self.keyspace, index_key)?;
        let remote_hlc =
            Hlc::decode(&r_hlc_bytes).ok_or_else(|| Error::InvalidKey("bad remote hlc".into()))?;

        let merged = {
            let mut guard = self.hlc.lock().await;
            let merged = guard.tick_on_receive(&remote_hlc, now_ms());
            *guard = merged.clone();
            merged
        };

        let local_latest = self.latest_version(&user_key).await?;
        let mut candidates = vec![remote_hlc.clone()];
        if let Some((local_hlc_bytes, _)) = &local_latest {
            if let Some(local_hlc) = Hlc::decode(local_hlc_bytes) {
                candidates.push(local_hlc);
            }
        }
        let winner = LwwResolver::resolve(&candidates).clone();

        let mut writes = Vec::new();
        if winner == remote_hlc {
            writes.push(WriteOp::new(
                Table::Data,
                codec::data_key(&self.keyspace, &user_key, &r_hlc_bytes),
                value.to_vec(),
            ));
            writes.push(WriteOp::new(
                Table::Index,
                index_key.to_vec(),
                SENTINEL.to_vec(),
            ));
        }
        let meta_bytes =
            rmp_serde::to_vec(&merged).map_err(|e| Error::Serialization(e.to_string()))?;
        writes.push(WriteOp::new(
            Table::Meta,
            meta_hlc_key(&self.keyspace),
            meta_bytes,
        ));
        self.inner.put_batch(writes).await?;

        Ok(winner)
    }
}

/// Lazily caches one `VersionedStorage` per keyspace ("sid"), sharing
/// inner backends as directed by `PartitionedStorage`.
pub struct VersionedStorageFactory {
    cache: DashMap<Vec<u8>, Arc<VersionedStorage>>,
    locks: DashMap<Vec<u8>, Arc<tokio::sync::Mutex<()>>>,
    node_id: NodeId,
    loads: AtomicU64,
}

impl VersionedStorageFactory {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            cache: DashMap::new(),
            locks: DashMap::new(),
            node_id,
            loads: AtomicU64::new(0),
        }
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub async fn get(
        &self,
        inner: Arc<dyn Storage>,
        keyspace: Vec<u8>,
    ) -> Result<Arc<VersionedStorage>> {
        if let Some(existing) = self.cache.get(&keyspace) {
            return Ok(existing.clone());
        }

        let lock = self
            .locks
            .entry(keyspace.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = self.cache.get(&keyspace) {
            return Ok(existing.clone());
        }

        let store = Arc::new(
            VersionedStorage::load(inner, keyspace.clone(), self.node_id.clone()).await?,
        );
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(keyspace, store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::redb_backend::RedbStorageFactory;
    use crate::port::StorageFactory as _;

    async fn store(keyspace: &[u8]) -> VersionedStorage {
        let dir = tempfile::tempdir().unwrap();
        let factory = RedbStorageFactory::new(dir.path().to_path_buf(), 16).unwrap();
        let inner = factory.get(0).await.unwrap();
        // leak the tempdir for the lifetime of the test store
        std::mem::forget(dir);
        VersionedStorage::load(inner, keyspace.to_vec(), NodeId::new("n1"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_returns_latest_value() {
        let vs = store(b"2a").await;
        vs.put(b"k", b"v1").await.unwrap();
        vs.put(b"k", b"v2").await.unwrap();
        assert_eq!(vs.get(b"k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn delete_then_get_is_absent_but_iter_still_sees_tombstone() {
        let vs = store(b"2a").await;
        vs.put(b"k", b"v1").await.unwrap();
        vs.delete(b"k").await.unwrap();
        assert_eq!(vs.get(b"k").await.unwrap(), None);

        let rows = vs.iter(None, None, false).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, TOMBSTONE.to_vec());
    }

    #[tokio::test]
    async fn iter_from_hlc_streams_in_ascending_order() {
        let vs = store(b"2a").await;
        vs.put(b"a", b"1").await.unwrap();
        vs.put(b"b", b"2").await.unwrap();
        vs.put(b"c", b"3").await.unwrap();

        let all = vs.iter_from_hlc(&[], None).await.unwrap();
        assert_eq!(all.len(), 3);
        let keys: Vec<_> = all.iter().map(|(_, k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn apply_remote_applied_twice_is_idempotent() {
        let vs = store(b"2a").await;
        let remote_hlc = Hlc::new(999, 0, NodeId::new("remote"));
        let index_key = codec::index_key(b"2a", &remote_hlc.encode(), b"k");

        let w1 = vs.apply_remote(&index_key, b"remote-value").await.unwrap();
        let w2 = vs.apply_remote(&index_key, b"remote-value").await.unwrap();
        assert_eq!(w1, w2);
        assert_eq!(vs.get(b"k").await.unwrap(), Some(b"remote-value".to_vec()));
    }

    #[tokio::test]
    async fn apply_remote_keeps_local_when_local_is_newer() {
        let vs = store(b"2a").await;
        vs.put(b"k", b"local").await.unwrap();

        let stale_remote = Hlc::new(0, 0, NodeId::new("remote"));
        let index_key = codec::index_key(b"2a", &stale_remote.encode(), b"k");
        vs.apply_remote(&index_key, b"stale").await.unwrap();

        assert_eq!(vs.get(b"k").await.unwrap(), Some(b"local".to_vec()));
    }
}
