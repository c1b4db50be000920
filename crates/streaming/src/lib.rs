//! Framed, mTLS-secured message transport between nodes.
//!
//! Wire format is a `u32` big-endian length prefix followed by a
//! MessagePack-serialized [`Message`]. [`MessageServer`] terminates
//! inbound connections and drives a [`RoutedApplication`] over each;
//! [`ClientConnectionPool`] maintains outbound connections to peers
//! and doubles as the [`replication`] crate's gossip transport.

pub mod client;
pub mod error;
pub mod flow_control;
pub mod message;
pub mod protocol;
pub mod router;
pub mod server;
pub mod streamer;
pub mod subscription;
pub mod tls;

pub use client::{ClientConnection, ClientConnectionConfig, ClientConnectionPool};
pub use error::{Error, Result};
pub use flow_control::FlowControl;
pub use message::Message;
pub use protocol::{Decoded, Protocol, ProtocolConfig};
pub use router::{MessageHandler, Router, RoutedApplication};
pub use server::{MessageServer, MessageServerConfig};
pub use streamer::Streamer;
pub use subscription::Subscription;
