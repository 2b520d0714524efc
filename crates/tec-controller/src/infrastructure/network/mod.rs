//! Client networking: connection tracking plus the transports behind it.

pub mod connection_manager;
pub mod memory;
pub mod tcp;

pub use connection_manager::{
    Connection, ConnectionLimits, ConnectionManager, Link, LinkError, NetworkError, Transport,
};
pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;
