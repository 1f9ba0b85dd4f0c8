//! An in-process store speaking the command subset the gateway uses.
//!
//! Every connection is an independent session over shared data. Each key
//! carries a version that moves on every modification, so `WATCH`/`EXEC`
//! gives the same optimistic concurrency as the remote store: a transaction
//! whose watched keys changed since `WATCH` is discarded and `EXEC` replies
//! with nil.
//!
//! # Example
//!
//! ```rust,ignore
//! use docmap_gateway::{Command, Connection, MemoryServer, Reply};
//!
//! let server = MemoryServer::new();
//! let mut conn = server.connection();
//! conn.send(&Command::new("SET").arg("k").arg("v")).await?;
//! let reply = conn.send(&Command::new("GET").arg("k")).await?;
//! assert_eq!(reply, Reply::Bulk("v".to_string()));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::address::Address;
use crate::command::{Command, Reply};
use crate::error::Error;
use crate::transport::{Connection, Connector};

enum Data {
    String(String),
    Hash(BTreeMap<String, String>),
    Json(serde_json::Value),
}

struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }
}

/// Versions are kept for live keys and for absent keys some session is
/// watching; everything else reads as version 0.
#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
    watchers: HashMap<String, usize>,
    clock: u64,
}

impl State {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        if self.entries.contains_key(key) || self.watchers.contains_key(key) {
            self.versions.insert(key.to_string(), self.clock);
        } else {
            self.versions.remove(key);
        }
    }

    fn watch(&mut self, key: &str) -> u64 {
        self.purge_expired(key);
        *self.watchers.entry(key.to_string()).or_default() += 1;
        self.version(key)
    }

    fn release(&mut self, watched: Vec<(String, u64)>) {
        for (key, _) in watched {
            let Some(count) = self.watchers.get_mut(&key) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.watchers.remove(&key);
                if !self.entries.contains_key(&key) {
                    self.versions.remove(&key);
                }
            }
        }
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| deadline <= Instant::now());
        if expired {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn get(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_expired(key);
        self.entries.get_mut(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        if self.entries.remove(key).is_some() {
            self.touch(key);
            true
        } else {
            false
        }
    }

    fn put(&mut self, key: &str, data: Data) {
        self.entries.insert(key.to_string(), Entry::new(data));
        self.touch(key);
    }
}

fn wrong_type() -> Reply {
    Reply::Error(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

fn wrong_arity(command: &Command) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.name().to_ascii_lowercase()
    ))
}

/// Check that a data command is known and has the right arity. Returns the
/// error reply for commands the server would reject.
fn validate(command: &Command) -> Option<Reply> {
    let args = command.arguments();
    let arity_ok = match command.name() {
        "PING" => args.len() <= 1,
        "ECHO" | "GET" | "HGETALL" => args.len() == 1,
        "SET" | "HGET" | "EXPIRE" => args.len() == 2,
        "DEL" | "UNLINK" | "EXISTS" => !args.is_empty(),
        "HSET" => args.len() >= 3 && args.len() % 2 == 1,
        "JSON.SET" => args.len() == 3,
        "JSON.GET" => !args.is_empty() && args.len() <= 2,
        name => return Some(Reply::Error(format!("ERR unknown command '{}'", name))),
    };
    if arity_ok {
        None
    } else {
        Some(wrong_arity(command))
    }
}

/// Run one command against the data.
fn execute(state: &mut State, command: &Command) -> Reply {
    if let Some(rejected) = validate(command) {
        return rejected;
    }

    let args = command.arguments();
    match command.name() {
        "PING" => match args.first() {
            Some(message) => Reply::Bulk(message.clone()),
            None => Reply::Status("PONG".to_string()),
        },
        "ECHO" => Reply::Bulk(args[0].clone()),
        "GET" => match state.get(&args[0]) {
            None => Reply::Nil,
            Some(Entry {
                data: Data::String(s),
                ..
            }) => Reply::Bulk(s.clone()),
            Some(_) => wrong_type(),
        },
        "SET" => {
            state.put(&args[0], Data::String(args[1].clone()));
            Reply::ok()
        }
        "DEL" | "UNLINK" => {
            let removed = args.iter().filter(|key| state.remove(key)).count();
            Reply::Integer(removed as i64)
        }
        "EXISTS" => {
            let found = args.iter().filter(|key| state.get(key).is_some()).count();
            Reply::Integer(found as i64)
        }
        "HSET" => hset(state, &args[0], &args[1..]),
        "HGET" => match state.get(&args[0]) {
            None => Reply::Nil,
            Some(Entry {
                data: Data::Hash(fields),
                ..
            }) => fields
                .get(&args[1])
                .map_or(Reply::Nil, |v| Reply::Bulk(v.clone())),
            Some(_) => wrong_type(),
        },
        "HGETALL" => match state.get(&args[0]) {
            None => Reply::Array(Vec::new()),
            Some(Entry {
                data: Data::Hash(fields),
                ..
            }) => Reply::Array(
                fields
                    .iter()
                    .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                    .collect(),
            ),
            Some(_) => wrong_type(),
        },
        "JSON.SET" => {
            if !is_root_path(&args[1]) {
                return Reply::Error("ERR only the root path can be set".to_string());
            }
            match serde_json::from_str(&args[2]) {
                Ok(doc) => {
                    state.put(&args[0], Data::Json(doc));
                    Reply::ok()
                }
                Err(e) => Reply::Error(format!("ERR invalid JSON: {}", e)),
            }
        }
        "JSON.GET" => {
            let path = args.get(1).map(String::as_str).unwrap_or(".");
            if !is_root_path(path) {
                return Reply::Error("ERR only the root path can be read".to_string());
            }
            match state.get(&args[0]) {
                None => Reply::Nil,
                Some(Entry {
                    data: Data::Json(doc),
                    ..
                }) => {
                    let text = if path == "$" {
                        serde_json::Value::Array(vec![doc.clone()]).to_string()
                    } else {
                        doc.to_string()
                    };
                    Reply::Bulk(text)
                }
                Some(_) => wrong_type(),
            }
        }
        "EXPIRE" => {
            let Ok(seconds) = args[1].parse::<i64>() else {
                return Reply::Error("ERR value is not an integer or out of range".to_string());
            };
            if state.get(&args[0]).is_none() {
                return Reply::Integer(0);
            }
            if seconds <= 0 {
                state.remove(&args[0]);
            } else if let Some(entry) = state.get(&args[0]) {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds as u64));
                state.touch(&args[0]);
            }
            Reply::Integer(1)
        }
        name => Reply::Error(format!("ERR unknown command '{}'", name)),
    }
}

fn is_root_path(path: &str) -> bool {
    path == "$" || path == "."
}

fn hset(state: &mut State, key: &str, pairs: &[String]) -> Reply {
    let added = match state.get(key) {
        None => {
            let fields: BTreeMap<String, String> = pairs
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            let added = fields.len();
            state.put(key, Data::Hash(fields));
            added
        }
        Some(Entry {
            data: Data::Hash(fields),
            ..
        }) => {
            let mut added = 0;
            for pair in pairs.chunks(2) {
                if fields.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            state.touch(key);
            added
        }
        Some(_) => return wrong_type(),
    };
    Reply::Integer(added as i64)
}

/// Shared in-memory data that hands out sessions.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Connector`] whose sessions all share this server's data.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    /// Open a session directly.
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            state: self.state.clone(),
            watched: Vec::new(),
            queued: None,
            aborted: false,
            closed: false,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let state = lock(&self.state);
        state
            .entries
            .values()
            .filter(|entry| entry.expires_at.map_or(true, |d| d > Instant::now()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connects to a [`MemoryServer`], whatever the address says.
#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &Address) -> Result<Box<dyn Connection>, Error> {
        debug!(address = %address, "opening in-memory session");
        Ok(Box::new(self.server.connection()))
    }
}

/// One session on a [`MemoryServer`].
pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
    watched: Vec<(String, u64)>,
    queued: Option<Vec<Command>>,
    /// A command was rejected while queuing; `EXEC` must apply nothing.
    aborted: bool,
    closed: bool,
}

impl MemoryConnection {
    fn unwatch(&mut self) {
        let watched = std::mem::take(&mut self.watched);
        if !watched.is_empty() {
            lock(&self.state).release(watched);
        }
    }

    fn dispatch(&mut self, command: &Command) -> Reply {
        match command.name() {
            "MULTI" => {
                if self.queued.is_some() {
                    return Reply::Error("ERR MULTI calls can not be nested".to_string());
                }
                self.queued = Some(Vec::new());
                self.aborted = false;
                Reply::ok()
            }
            "EXEC" => {
                let Some(queued) = self.queued.take() else {
                    return Reply::Error("ERR EXEC without MULTI".to_string());
                };
                let watched = std::mem::take(&mut self.watched);
                let mut state = lock(&self.state);
                let changed = watched
                    .iter()
                    .any(|(key, version)| state.version(key) != *version);
                state.release(watched);
                if std::mem::take(&mut self.aborted) {
                    return Reply::Error(
                        "EXECABORT Transaction discarded because of previous errors.".to_string(),
                    );
                }
                if changed {
                    return Reply::Nil;
                }
                Reply::Array(
                    queued
                        .iter()
                        .map(|command| execute(&mut state, command))
                        .collect(),
                )
            }
            "DISCARD" => {
                if self.queued.take().is_none() {
                    return Reply::Error("ERR DISCARD without MULTI".to_string());
                }
                self.aborted = false;
                self.unwatch();
                Reply::ok()
            }
            "WATCH" => {
                if self.queued.is_some() {
                    return Reply::Error("ERR WATCH inside MULTI is not allowed".to_string());
                }
                if command.arguments().is_empty() {
                    return wrong_arity(command);
                }
                let mut state = lock(&self.state);
                for key in command.arguments() {
                    let version = state.watch(key);
                    self.watched.push((key.clone(), version));
                }
                Reply::ok()
            }
            "UNWATCH" => {
                self.unwatch();
                Reply::ok()
            }
            _ => match &mut self.queued {
                Some(queued) => match validate(command) {
                    Some(rejected) => {
                        self.aborted = true;
                        rejected
                    }
                    None => {
                        queued.push(command.clone());
                        Reply::Status("QUEUED".to_string())
                    }
                },
                None => execute(&mut lock(&self.state), command),
            },
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.unwatch();
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, command: &Command) -> Result<Reply, Error> {
        if self.closed {
            return Err(Error::transport("connection is closed"));
        }
        Ok(self.dispatch(command))
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        self.unwatch();
        self.queued = None;
        self.aborted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Command {
        Command::new(parts[0]).args(parts[1..].iter().copied())
    }

    async fn send(conn: &mut MemoryConnection, parts: &[&str]) -> Reply {
        conn.send(&cmd(parts)).await.unwrap()
    }

    fn bulk(s: &str) -> Reply {
        Reply::Bulk(s.to_string())
    }

    #[tokio::test]
    async fn strings_and_deletes() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        assert_eq!(send(&mut conn, &["SET", "k", "v"]).await, Reply::ok());
        assert_eq!(send(&mut conn, &["GET", "k"]).await, bulk("v"));
        assert_eq!(send(&mut conn, &["UNLINK", "k", "nope"]).await, Reply::Integer(1));
        assert_eq!(send(&mut conn, &["UNLINK", "k"]).await, Reply::Integer(0));
        assert_eq!(send(&mut conn, &["GET", "k"]).await, Reply::Nil);
        assert!(server.is_empty());
    }

    #[tokio::test]
    async fn hashes() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        assert_eq!(
            send(&mut conn, &["HSET", "h", "b", "2", "a", "1"]).await,
            Reply::Integer(2)
        );
        assert_eq!(send(&mut conn, &["HSET", "h", "a", "3"]).await, Reply::Integer(0));
        assert_eq!(send(&mut conn, &["HGET", "h", "a"]).await, bulk("3"));
        assert_eq!(
            send(&mut conn, &["HGETALL", "h"]).await,
            Reply::Array(vec![bulk("a"), bulk("3"), bulk("b"), bulk("2")])
        );
        assert_eq!(send(&mut conn, &["HGETALL", "none"]).await, Reply::Array(vec![]));
        assert!(matches!(send(&mut conn, &["GET", "h"]).await, Reply::Error(_)));
        assert!(matches!(send(&mut conn, &["HSET", "h", "odd"]).await, Reply::Error(_)));
    }

    #[tokio::test]
    async fn json_documents() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        assert_eq!(
            send(&mut conn, &["JSON.SET", "d", "$", r#"{"a":1}"#]).await,
            Reply::ok()
        );
        assert_eq!(send(&mut conn, &["JSON.GET", "d"]).await, bulk(r#"{"a":1}"#));
        assert_eq!(send(&mut conn, &["JSON.GET", "d", "$"]).await, bulk(r#"[{"a":1}]"#));
        assert!(matches!(
            send(&mut conn, &["JSON.SET", "d", "$.a", "2"]).await,
            Reply::Error(_)
        ));
        assert!(matches!(
            send(&mut conn, &["JSON.SET", "d", "$", "{"]).await,
            Reply::Error(_)
        ));
    }

    #[tokio::test]
    async fn expire_removes_keys() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        send(&mut conn, &["SET", "k", "v"]).await;
        assert_eq!(send(&mut conn, &["EXPIRE", "k", "100"]).await, Reply::Integer(1));
        assert_eq!(send(&mut conn, &["EXISTS", "k"]).await, Reply::Integer(1));
        assert_eq!(send(&mut conn, &["EXPIRE", "k", "0"]).await, Reply::Integer(1));
        assert_eq!(send(&mut conn, &["EXISTS", "k"]).await, Reply::Integer(0));
        assert_eq!(send(&mut conn, &["EXPIRE", "k", "5"]).await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn transaction_commits_when_untouched() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        send(&mut conn, &["WATCH", "k"]).await;
        send(&mut conn, &["MULTI"]).await;
        assert_eq!(
            send(&mut conn, &["SET", "k", "v"]).await,
            Reply::Status("QUEUED".to_string())
        );
        assert_eq!(
            send(&mut conn, &["EXEC"]).await,
            Reply::Array(vec![Reply::ok()])
        );
        assert_eq!(send(&mut conn, &["GET", "k"]).await, bulk("v"));
    }

    #[tokio::test]
    async fn transaction_aborts_after_concurrent_write() {
        let server = MemoryServer::new();
        let mut first = server.connection();
        let mut second = server.connection();

        send(&mut first, &["WATCH", "k"]).await;
        send(&mut first, &["MULTI"]).await;
        send(&mut first, &["SET", "k", "mine"]).await;

        send(&mut second, &["SET", "k", "theirs"]).await;

        assert_eq!(send(&mut first, &["EXEC"]).await, Reply::Nil);
        assert_eq!(send(&mut first, &["GET", "k"]).await, bulk("theirs"));
    }

    #[tokio::test]
    async fn watch_sees_deletes_of_missing_keys_as_unchanged() {
        let server = MemoryServer::new();
        let mut first = server.connection();
        let mut second = server.connection();
        send(&mut first, &["WATCH", "k"]).await;
        send(&mut second, &["UNLINK", "k"]).await;
        send(&mut first, &["MULTI"]).await;
        send(&mut first, &["SET", "k", "v"]).await;
        assert_eq!(
            send(&mut first, &["EXEC"]).await,
            Reply::Array(vec![Reply::ok()])
        );
    }

    #[tokio::test]
    async fn rejected_commands_abort_the_whole_transaction() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        send(&mut conn, &["HSET", "k", "a", "1"]).await;

        send(&mut conn, &["MULTI"]).await;
        assert_eq!(
            send(&mut conn, &["UNLINK", "k"]).await,
            Reply::Status("QUEUED".to_string())
        );
        assert!(matches!(send(&mut conn, &["HSET", "k", "odd"]).await, Reply::Error(_)));
        assert!(matches!(send(&mut conn, &["FLY"]).await, Reply::Error(_)));
        match send(&mut conn, &["EXEC"]).await {
            Reply::Error(message) => assert!(message.starts_with("EXECABORT")),
            other => panic!("expected EXECABORT, got {:?}", other),
        }

        assert_eq!(
            send(&mut conn, &["HGETALL", "k"]).await,
            Reply::Array(vec![bulk("a"), bulk("1")])
        );

        // The next transaction starts clean.
        send(&mut conn, &["MULTI"]).await;
        send(&mut conn, &["UNLINK", "k"]).await;
        assert_eq!(
            send(&mut conn, &["EXEC"]).await,
            Reply::Array(vec![Reply::Integer(1)])
        );
    }

    #[tokio::test]
    async fn discard_clears_a_rejected_transaction() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        send(&mut conn, &["MULTI"]).await;
        send(&mut conn, &["GET"]).await;
        assert_eq!(send(&mut conn, &["DISCARD"]).await, Reply::ok());
        send(&mut conn, &["MULTI"]).await;
        send(&mut conn, &["SET", "k", "v"]).await;
        assert_eq!(
            send(&mut conn, &["EXEC"]).await,
            Reply::Array(vec![Reply::ok()])
        );
    }

    #[tokio::test]
    async fn versions_of_deleted_keys_are_dropped() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        send(&mut conn, &["SET", "a", "1"]).await;
        send(&mut conn, &["HSET", "b", "f", "v"]).await;
        send(&mut conn, &["UNLINK", "a", "b"]).await;
        send(&mut conn, &["EXPIRE", "missing", "5"]).await;
        assert!(lock(&server.state).versions.is_empty());
    }

    #[tokio::test]
    async fn watched_keys_keep_versions_until_released() {
        let server = MemoryServer::new();
        let mut watcher = server.connection();
        let mut writer = server.connection();

        // Created and deleted again while watched: still a modification.
        send(&mut watcher, &["WATCH", "k"]).await;
        send(&mut writer, &["SET", "k", "v"]).await;
        send(&mut writer, &["UNLINK", "k"]).await;
        send(&mut watcher, &["MULTI"]).await;
        send(&mut watcher, &["SET", "k", "mine"]).await;
        assert_eq!(send(&mut watcher, &["EXEC"]).await, Reply::Nil);

        let state = lock(&server.state);
        assert!(state.versions.is_empty());
        assert!(state.watchers.is_empty());
    }

    #[tokio::test]
    async fn dropped_sessions_release_their_watches() {
        let server = MemoryServer::new();
        {
            let mut conn = server.connection();
            send(&mut conn, &["WATCH", "k", "j"]).await;
            assert_eq!(lock(&server.state).watchers.len(), 2);
        }
        assert!(lock(&server.state).watchers.is_empty());
    }

    #[tokio::test]
    async fn transaction_state_errors() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        assert!(matches!(send(&mut conn, &["EXEC"]).await, Reply::Error(_)));
        assert!(matches!(send(&mut conn, &["DISCARD"]).await, Reply::Error(_)));
        send(&mut conn, &["MULTI"]).await;
        assert!(matches!(send(&mut conn, &["MULTI"]).await, Reply::Error(_)));
        assert!(matches!(send(&mut conn, &["WATCH", "k"]).await, Reply::Error(_)));
        assert_eq!(send(&mut conn, &["DISCARD"]).await, Reply::ok());
    }

    #[tokio::test]
    async fn unknown_commands_are_error_replies() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        assert!(matches!(send(&mut conn, &["FLY"]).await, Reply::Error(_)));
        assert!(matches!(send(&mut conn, &["GET"]).await, Reply::Error(_)));
    }

    #[tokio::test]
    async fn closed_connections_fail() {
        let server = MemoryServer::new();
        let mut conn = server.connection();
        conn.close().await.unwrap();
        assert!(conn.send(&cmd(&["PING"])).await.is_err());
    }
}
