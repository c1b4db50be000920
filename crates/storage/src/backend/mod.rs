pub mod redb_backend;

pub use redb_backend::{RedbStorage, RedbStorageFactory};
