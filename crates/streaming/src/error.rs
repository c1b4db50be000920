//! Error types for the streaming crate.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("frame exceeds max_message_size ({0} > {1})")]
    FrameTooLarge(u32, u32),

    #[error("connection buffer exceeds max_buffer_size ({0} > {1})")]
    BufferOverflow(usize, usize),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("pool is stopped")]
    PoolStopped,

    #[error("node_id {0:?} is not registered")]
    NotRegistered(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
