//! The application-side value tree.
//!
//! Unlike stored JSON, this tree knows about dates and geo-points, and can
//! carry an explicit `Undefined` for keys that are present without a value.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::convert;
use crate::path::{Location, Step};

/// A longitude/latitude pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.longitude, self.latitude)
    }
}

/// A tree-shaped application value, typed per schema after decoding.
///
/// # Design Notes
///
/// - Uses `BTreeMap` for deterministic ordering of object keys
/// - Keeps `Integer` and `Float` apart so whole numbers stay whole in storage
/// - `Date` and `Point` never appear in stored documents; the codec maps them
///   to their canonical stored forms
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// A key that exists but holds nothing. Dropped when encoding.
    Undefined,
    /// Explicit null. Passes through conversions unchanged.
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// A semantic instant.
    Date(DateTime<Utc>),
    /// A geo-point.
    Point(GeoPoint),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Point(_) => "point",
            Value::Array(_) => "array",
            Value::Map(_) => "object",
        }
    }

    /// Insert a key into a map value. No-op on anything else.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Map(map) = &mut self {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Get a reference to the value at a resolved location.
    pub fn get(&self, location: &Location) -> Option<&Value> {
        let mut current = self;
        for step in location.iter() {
            current = current.child(step)?;
        }
        Some(current)
    }

    /// Get a mutable reference to the value at a resolved location.
    pub fn get_mut(&mut self, location: &Location) -> Option<&mut Value> {
        let mut current = self;
        for step in location.iter() {
            current = match (current, step) {
                (Value::Map(map), Step::Key(key)) => map.get_mut(key)?,
                (Value::Array(arr), Step::Index(index)) => arr.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get a direct child by step.
    pub fn child(&self, step: &Step) -> Option<&Value> {
        match (self, step) {
            (Value::Map(map), Step::Key(key)) => map.get(key),
            (Value::Array(arr), Step::Index(index)) => arr.get(*index),
            _ => None,
        }
    }

    /// Overwrite the value at a location. Returns `false` if the location
    /// no longer exists.
    pub fn replace(&mut self, location: &Location, value: Value) -> bool {
        match self.get_mut(location) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Remove the value at a location.
    ///
    /// Map entries are removed outright. Array elements are left as
    /// `Undefined` holes so sibling locations stay valid.
    pub fn remove(&mut self, location: &Location) -> Option<Value> {
        let (last, parent) = location.split_last()?;
        match (self.get_mut(&parent)?, last) {
            (Value::Map(map), Step::Key(key)) => map.remove(key),
            (Value::Array(arr), Step::Index(index)) => arr
                .get_mut(*index)
                .map(|slot| std::mem::replace(slot, Value::Undefined)),
            _ => None,
        }
    }

    /// Build from untyped JSON. Numbers keep their integer/float distinction.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Lower into untyped JSON.
    ///
    /// `Undefined` map entries are omitted and become `null` inside arrays.
    /// Dates become epoch seconds and points become `{longitude, latitude}`
    /// objects; the codec rewrites both before this point for known fields.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => float_to_json(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Date(date) => convert::date_to_epoch(&date).into_json(),
            Value::Point(point) => serde_json::json!({
                "longitude": point.longitude,
                "latitude": point.latitude,
            }),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Value::into_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<GeoPoint> for Value {
    fn from(v: GeoPoint) -> Self {
        Value::Point(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
