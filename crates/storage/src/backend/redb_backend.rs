//! `redb`-backed implementation of the `Storage` port.
//!
//! Each `RedbStorage` owns one `redb::Database` file with four byte-keyed
//! tables (system/data/index/meta). Reads and writes run on the blocking
//! thread pool via `spawn_blocking`, matching the concurrency model's
//! "synchronous backend offloaded to worker threads" rule.

use crate::error::{Error, Result};
use crate::port::{Storage, StorageFactory, Table, WriteOp};
use async_trait::async_trait;
use dashmap::DashMap;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::Bound;
use std::path::PathBuf;
use std::sync::Arc;

const SYSTEM: TableDefinition<&[u8], &[u8]> = TableDefinition::new("system");
const DATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");
const INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index");
const META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("meta");

fn table_def(table: Table) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match table {
        Table::System => SYSTEM,
        Table::Data => DATA,
        Table::Index => INDEX,
        Table::Meta => META,
    }
}

pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    pub fn open(path: PathBuf) -> Result<Self> {
        let db = Database::create(path)?;
        // Ensure all four tables exist so reads against an empty store
        // don't fail with a missing-table error.
        let txn = db.begin_write()?;
        for table in [Table::System, Table::Data, Table::Index, Table::Meta] {
            txn.open_table(table_def(table))?;
        }
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl Storage for RedbStorage {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.to_vec();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            let tbl = txn.open_table(table_def(table))?;
            let result = tbl.get(key.as_slice())?.map(|guard| guard.value().to_vec());
            Ok(result)
        })
        .await
        .map_err(|e| Error::Transaction(e.to_string()))?
    }

    async fn put_batch(&self, writes: Vec<WriteOp>) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write()?;
            {
                for op in &writes {
                    let mut tbl = txn.open_table(table_def(op.table))?;
                    tbl.insert(op.key.as_slice(), op.value.as_slice())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Transaction(e.to_string()))?
    }

    async fn scan(
        &self,
        table: Table,
        start: Vec<u8>,
        end: Option<Vec<u8>>,
        reverse: bool,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            let tbl = txn.open_table(table_def(table))?;
            let upper = match &end {
                Some(e) => Bound::Excluded(e.as_slice()),
                None => Bound::Unbounded,
            };
            let range = tbl.range::<&[u8]>((Bound::Included(start.as_slice()), upper))?;

            let mut out = Vec::new();
            if reverse {
                for item in range.rev() {
                    let (k, v) = item?;
                    out.push((k.value().to_vec(), v.value().to_vec()));
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            } else {
                for item in range {
                    let (k, v) = item?;
                    out.push((k.value().to_vec(), v.value().to_vec()));
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| Error::Transaction(e.to_string()))?
    }
}

/// Opens one `RedbStorage` per environment index, lazily, under
/// `base_dir/env_{index}.redb`.
pub struct RedbStorageFactory {
    base_dir: PathBuf,
    max_keyspaces: u64,
    instances: DashMap<u64, Arc<RedbStorage>>,
    closed: std::sync::atomic::AtomicBool,
}

impl RedbStorageFactory {
    pub fn new(base_dir: PathBuf, max_keyspaces: u64) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            max_keyspaces,
            instances: DashMap::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StorageFactory for RedbStorageFactory {
    fn max_keyspaces(&self) -> u64 {
        self.max_keyspaces
    }

    async fn get(&self, env_index: u64) -> Result<Arc<dyn Storage>> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if let Some(existing) = self.instances.get(&env_index) {
            return Ok(existing.clone() as Arc<dyn Storage>);
        }
        let path = self.base_dir.join(format!("env_{env_index}.redb"));
        let storage = Arc::new(RedbStorage::open(path)?);
        self.instances.insert(env_index, storage.clone());
        Ok(storage as Arc<dyn Storage>)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        self.instances.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RedbStorageFactory::new(dir.path().to_path_buf(), 16).unwrap();
        let storage = factory.get(0).await.unwrap();

        storage
            .put_batch(vec![WriteOp::new(Table::Data, b"k1".to_vec(), b"v1".to_vec())])
            .await
            .unwrap();

        let value = storage.get(Table::Data, b"k1").await.unwrap();
        assert_eq!(value, Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn scan_respects_bounds_and_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RedbStorageFactory::new(dir.path().to_path_buf(), 16).unwrap();
        let storage = factory.get(0).await.unwrap();

        let writes = (0..5)
            .map(|i| WriteOp::new(Table::Data, vec![i], vec![i]))
            .collect();
        storage.put_batch(writes).await.unwrap();

        let forward = storage
            .scan(Table::Data, vec![1], Some(vec![4]), false, None)
            .await
            .unwrap();
        assert_eq!(
            forward.into_iter().map(|(k, _)| k[0]).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let reverse = storage
            .scan(Table::Data, vec![0], None, true, Some(2))
            .await
            .unwrap();
        assert_eq!(
            reverse.into_iter().map(|(k, _)| k[0]).collect::<Vec<_>>(),
            vec![4, 3]
        );
    }

    #[tokio::test]
    async fn same_env_index_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RedbStorageFactory::new(dir.path().to_path_buf(), 16).unwrap();
        let a = factory.get(0).await.unwrap();
        a.put_batch(vec![WriteOp::new(Table::Meta, b"k".to_vec(), b"v".to_vec())])
            .await
            .unwrap();
        let b = factory.get(0).await.unwrap();
        assert_eq!(b.get(Table::Meta, b"k").await.unwrap(), Some(b"v".to_vec()));
    }
}
