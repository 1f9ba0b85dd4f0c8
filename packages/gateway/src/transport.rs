//! The seam between the gateway and whatever actually talks to the store.
//!
//! A network client implements [`Connector`] and [`Connection`]; the
//! gateway only ever sends [`Command`]s and interprets [`Reply`]s.

use async_trait::async_trait;

use crate::address::Address;
use crate::command::{Command, Reply};
use crate::error::Error;

/// One session with the store.
///
/// Commands sent on a connection are processed in order, and transaction
/// state (`WATCH`, `MULTI`) belongs to the connection.
///
/// # Object Safety
///
/// This trait is object-safe: the gateway holds a `Box<dyn Connection>`.
#[async_trait]
pub trait Connection: Send {
    /// Send one command and wait for its reply.
    ///
    /// Error replies from the store come back as `Ok(Reply::Error(_))`;
    /// `Err` is reserved for transport failures.
    async fn send(&mut self, command: &Command) -> Result<Reply, Error>;

    /// Release the session.
    async fn close(&mut self) -> Result<(), Error>;
}

/// Opens sessions to an address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>, Error>;
}

#[async_trait]
impl<T: Connection + ?Sized> Connection for Box<T> {
    async fn send(&mut self, command: &Command) -> Result<Reply, Error> {
        self.as_mut().send(command).await
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.as_mut().close().await
    }
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for std::sync::Arc<T> {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>, Error> {
        self.as_ref().connect(address).await
    }
}
