//! Session-scoped access to the store.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::address::{Address, GatewayConfig};
use crate::command::{Command, FromReply, Reply};
use crate::error::Error;
use crate::transport::{Connection, Connector};

/// A session wrapper around one store connection.
///
/// Every operation takes `&mut self`: a session runs one command sequence
/// at a time, which keeps the `WATCH`..`EXEC` window of
/// [`Gateway::replace_flat_record`] free of interleaved commands. Use one
/// gateway per concurrent writer.
///
/// # Example
///
/// ```rust,ignore
/// use std::collections::BTreeMap;
/// use docmap_gateway::{Gateway, MemoryServer};
///
/// let server = MemoryServer::new();
/// let mut gateway = Gateway::new(server.connector());
/// gateway.open("redis://localhost:6379").await?;
///
/// let fields = BTreeMap::from([("name".to_string(), "Alice".to_string())]);
/// gateway.replace_flat_record("user:1", &fields).await?;
/// assert_eq!(gateway.read_flat_record("user:1").await?, fields);
///
/// gateway.close().await?;
/// ```
pub struct Gateway {
    connector: Box<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
}

impl Gateway {
    /// Create a gateway. No connection is made until [`Gateway::open`].
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            connection: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect to the store at `address`.
    pub async fn open(&mut self, address: &str) -> Result<(), Error> {
        let address = Address::parse(address)?;
        self.open_address(&address).await
    }

    /// Connect using a [`GatewayConfig`].
    pub async fn open_with(&mut self, config: &GatewayConfig) -> Result<(), Error> {
        let address = config.address()?;
        self.open_address(&address).await
    }

    async fn open_address(&mut self, address: &Address) -> Result<(), Error> {
        if self.connection.is_some() {
            return Err(Error::AlreadyOpen);
        }
        debug!(address = %address, "opening session");
        self.connection = Some(self.connector.connect(address).await?);
        Ok(())
    }

    /// Close the session. Only valid after a successful `open`.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut connection = self.connection.take().ok_or(Error::NotOpen)?;
        debug!("closing session");
        connection.close().await
    }

    async fn send(&mut self, command: &Command) -> Result<Reply, Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;
        debug!(
            command = command.name(),
            args = command.arguments().len(),
            "sending"
        );
        match connection.send(command).await? {
            Reply::Error(message) => Err(Error::Server(message)),
            reply => Ok(reply),
        }
    }

    /// Run an arbitrary command and convert its reply.
    pub async fn execute<T: FromReply>(&mut self, command: Command) -> Result<T, Error> {
        let reply = self.send(&command).await?;
        T::from_reply(reply)
    }

    /// Delete a key. A missing key is not an error.
    pub async fn unlink(&mut self, key: &str) -> Result<(), Error> {
        self.execute::<i64>(Command::new("UNLINK").arg(key))
            .await
            .map(|_| ())
    }

    /// Set a time to live on a key.
    pub async fn expire(&mut self, key: &str, seconds: u64) -> Result<(), Error> {
        self.execute::<i64>(Command::new("EXPIRE").arg(key).arg(seconds.to_string()))
            .await
            .map(|_| ())
    }

    /// Read a flat record. Absent keys read as an empty map.
    pub async fn read_flat_record(&mut self, key: &str) -> Result<BTreeMap<String, String>, Error> {
        self.execute(Command::new("HGETALL").arg(key)).await
    }

    /// Atomically replace a flat record.
    ///
    /// Watches `key`, then deletes it and writes `fields` in one
    /// transaction. If another session modifies `key` between the watch and
    /// the commit, nothing is written and [`Error::WriteConflict`] is
    /// returned. An empty `fields` map leaves the key deleted.
    pub async fn replace_flat_record(
        &mut self,
        key: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.send(&Command::new("WATCH").arg(key)).await?;

        if let Err(e) = self.send(&Command::new("MULTI")).await {
            self.abandon("UNWATCH").await;
            return Err(e);
        }
        if let Err(e) = self.queue_replace(key, fields).await {
            self.abandon("DISCARD").await;
            return Err(e);
        }

        match self.send(&Command::new("EXEC")).await? {
            Reply::Nil => {
                warn!(key, "replace aborted by a concurrent write");
                Err(Error::WriteConflict {
                    key: key.to_string(),
                })
            }
            Reply::Array(replies) => {
                for reply in replies {
                    if let Reply::Error(message) = reply {
                        return Err(Error::Server(message));
                    }
                }
                Ok(())
            }
            other => Err(Error::UnexpectedReply {
                expected: "transaction results",
                reply: other,
            }),
        }
    }

    async fn queue_replace(
        &mut self,
        key: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.send(&Command::new("UNLINK").arg(key)).await?;
        if !fields.is_empty() {
            let pairs = fields.iter().flat_map(|(f, v)| [f.clone(), v.clone()]);
            self.send(&Command::new("HSET").arg(key).args(pairs)).await?;
        }
        Ok(())
    }

    /// Best-effort cleanup of transaction state after a failure. The
    /// original error is what the caller sees.
    async fn abandon(&mut self, command: &str) {
        if let Err(e) = self.send(&Command::new(command)).await {
            debug!(command, error = %e, "cleanup after failed replace also failed");
        }
    }

    /// Read a stored JSON document.
    pub async fn read_document(&mut self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        self.execute(Command::new("JSON.GET").arg(key)).await
    }

    /// Write a stored JSON document, replacing any previous one.
    pub async fn write_document(
        &mut self,
        key: &str,
        document: &serde_json::Value,
    ) -> Result<(), Error> {
        let text = serde_json::to_string(document)?;
        self.execute(Command::new("JSON.SET").arg(key).arg("$").arg(text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryServer;

    #[tokio::test]
    async fn operations_need_an_open_session() {
        let mut gateway = Gateway::new(MemoryServer::new().connector());
        assert!(matches!(gateway.unlink("k").await, Err(Error::NotOpen)));
        assert!(matches!(gateway.close().await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn open_twice_is_an_error() {
        let mut gateway = Gateway::new(MemoryServer::new().connector());
        gateway.open("redis://localhost").await.unwrap();
        assert!(matches!(
            gateway.open("redis://localhost").await,
            Err(Error::AlreadyOpen)
        ));
        gateway.close().await.unwrap();
        assert!(!gateway.is_open());
    }

    #[tokio::test]
    async fn bad_address_does_not_open() {
        let mut gateway = Gateway::new(MemoryServer::new().connector());
        assert!(matches!(
            gateway.open("::nonsense").await,
            Err(Error::InvalidAddress { .. })
        ));
        assert!(!gateway.is_open());
    }

    #[tokio::test]
    async fn error_replies_become_server_errors() {
        let mut gateway = Gateway::new(MemoryServer::new().connector());
        gateway.open("redis://localhost").await.unwrap();
        let err = gateway
            .execute::<Reply>(Command::new("NOSUCHCOMMAND"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server(_)));
    }
}
