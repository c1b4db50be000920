//! Error types for the replication crate.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node identity mismatch: configured {configured:?} but persisted {persisted:?}")]
    IdentityMismatch { configured: String, persisted: String },

    #[error("node size mismatch: configured {configured} but persisted {persisted}")]
    SizeMismatch { configured: String, persisted: String },

    #[error("meta value {0:?} is corrupt")]
    CorruptMeta(String),

    #[error("storage error: {0}")]
    Storage(#[from] storage::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}
