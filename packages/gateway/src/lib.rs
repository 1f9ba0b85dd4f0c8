//! docmap gateway: session access to a key-value store.
//!
//! A [`Gateway`] wraps one connection and offers the handful of operations
//! the document layer needs: deleting keys, reading flat records, and
//! atomically replacing a flat record under optimistic concurrency
//! (`WATCH`/`MULTI`/`EXEC`). A concurrent modification surfaces as
//! [`Error::WriteConflict`], which callers may retry.
//!
//! Transport is pluggable through [`Connector`] and [`Connection`].
//! [`MemoryServer`] is an in-process implementation with the same
//! transaction semantics, used for tests and local runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use docmap_gateway::{Gateway, GatewayConfig, MemoryServer};
//!
//! let mut gateway = Gateway::new(MemoryServer::new().connector());
//! gateway.open_with(&GatewayConfig::from_env()).await?;
//! gateway.unlink("stale:key").await?;
//! gateway.close().await?;
//! ```

mod address;
mod command;
mod error;
mod gateway;
mod memory;
mod transport;

pub use address::{Address, GatewayConfig, DEFAULT_PORT, DEFAULT_URL, URL_ENV_VAR};
pub use command::{Command, FromReply, Reply};
pub use error::Error;
pub use gateway::Gateway;
pub use memory::{MemoryConnection, MemoryConnector, MemoryServer};
pub use transport::{Connection, Connector};
