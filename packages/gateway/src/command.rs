//! Commands sent to the store and the replies it sends back.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;

/// A store command: a name and its string arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
}

impl Command {
    /// Start a command. Names are normalized to upper case.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_ascii_uppercase(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A reply from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// No value, including an aborted transaction.
    Nil,
    /// Simple status such as `OK` or `QUEUED`.
    Status(String),
    Integer(i64),
    Bulk(String),
    Array(Vec<Reply>),
    /// The store rejected the command.
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }
}

/// Conversion from a reply into a caller-declared result type.
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> Result<Self, Error>;
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        Ok(reply)
    }
}

impl FromReply for () {
    fn from_reply(_reply: Reply) -> Result<Self, Error> {
        Ok(())
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        match reply {
            Reply::Integer(i) => Ok(i),
            Reply::Bulk(ref s) | Reply::Status(ref s) => s
                .parse()
                .map_err(|_| Error::unexpected("an integer", reply.clone())),
            other => Err(Error::unexpected("an integer", other)),
        }
    }
}

impl FromReply for bool {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        match reply {
            Reply::Integer(i) => Ok(i != 0),
            Reply::Status(ref s) if s == "OK" => Ok(true),
            Reply::Nil => Ok(false),
            other => Err(Error::unexpected("a boolean", other)),
        }
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        match reply {
            Reply::Bulk(s) | Reply::Status(s) => Ok(s),
            Reply::Integer(i) => Ok(i.to_string()),
            other => Err(Error::unexpected("a string", other)),
        }
    }
}

impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        match reply {
            Reply::Nil => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        match reply {
            Reply::Array(items) => items.into_iter().map(T::from_reply).collect(),
            Reply::Nil => Ok(Vec::new()),
            other => Err(Error::unexpected("an array", other)),
        }
    }
}

/// Flat field maps arrive as `[field, value, field, value, ...]`.
impl FromReply for BTreeMap<String, String> {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        let items = match reply {
            Reply::Array(items) if items.len() % 2 == 0 => items,
            Reply::Nil => return Ok(BTreeMap::new()),
            other => return Err(Error::unexpected("a field/value array", other)),
        };
        let mut map = BTreeMap::new();
        let mut items = items.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            map.insert(String::from_reply(field)?, String::from_reply(value)?);
        }
        Ok(map)
    }
}

/// Documents arrive as JSON text.
impl FromReply for serde_json::Value {
    fn from_reply(reply: Reply) -> Result<Self, Error> {
        match reply {
            Reply::Bulk(text) => Ok(serde_json::from_str(&text)?),
            Reply::Nil => Ok(serde_json::Value::Null),
            other => Err(Error::unexpected("a JSON document", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bulk(s: &str) -> Reply {
        Reply::Bulk(s.to_string())
    }

    #[test]
    fn command_builds_and_displays() {
        let cmd = Command::new("hset").arg("k").args(["f", "v"]);
        assert_eq!(cmd.name(), "HSET");
        assert_eq!(cmd.arguments(), &["k", "f", "v"]);
        assert_eq!(cmd.to_string(), "HSET k f v");
    }

    #[test]
    fn scalar_conversions() {
        assert_eq!(i64::from_reply(Reply::Integer(3)).unwrap(), 3);
        assert_eq!(i64::from_reply(bulk("42")).unwrap(), 42);
        assert!(i64::from_reply(bulk("x")).is_err());
        assert!(bool::from_reply(Reply::Integer(1)).unwrap());
        assert!(!bool::from_reply(Reply::Nil).unwrap());
        assert_eq!(String::from_reply(bulk("v")).unwrap(), "v");
        assert_eq!(Option::<String>::from_reply(Reply::Nil).unwrap(), None);
    }

    #[test]
    fn field_map_from_pairs() {
        let reply = Reply::Array(vec![bulk("a"), bulk("1"), bulk("b"), bulk("2")]);
        let map = BTreeMap::<String, String>::from_reply(reply).unwrap();
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.len(), 2);

        let odd = Reply::Array(vec![bulk("a")]);
        assert!(BTreeMap::<String, String>::from_reply(odd).is_err());
    }

    #[test]
    fn json_documents() {
        let doc = serde_json::Value::from_reply(bulk(r#"{"a":[1,2]}"#)).unwrap();
        assert_eq!(doc, json!({ "a": [1, 2] }));
        assert!(serde_json::Value::from_reply(bulk("{")).is_err());
    }

    #[test]
    fn mismatches_name_the_expectation() {
        let err = String::from_reply(Reply::Array(vec![])).unwrap_err();
        assert!(err.to_string().contains("a string"));
    }
}
