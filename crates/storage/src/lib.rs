//! Embedded multi-version key-value storage.
//!
//! Layering, bottom to top: [`backend`] is the raw byte-oriented `redb`
//! implementation of the [`port::Storage`] trait; [`codec`] frames user
//! keys and HLCs into the `data`/`index` byte layouts; [`versioned`] adds
//! per-partition HLC bookkeeping and last-writer-wins conflict
//! resolution; [`partitioned`] fans operations out across a bounded pool
//! of backend instances by logical partition.

pub mod backend;
pub mod codec;
pub mod error;
pub mod partitioned;
pub mod port;
pub mod versioned;

pub use error::{Error, Result};
pub use partitioned::PartitionedStorage;
pub use port::{Storage, StorageFactory, Table, WriteOp};
pub use versioned::{VersionedStorage, VersionedStorageFactory};
