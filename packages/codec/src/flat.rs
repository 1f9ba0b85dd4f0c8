//! Flat records: the string-to-string field map form of a document.
//!
//! Only top-level members are represented. Known fields are stored under
//! their flat field name; everything else keeps its own key.

use std::collections::BTreeMap;

use crate::convert::{date_to_epoch, decode_known, describe, encode_known, epoch_to_date};
use crate::encode::null_in_array;
use crate::error::Error;
use crate::path::{Location, Step};
use crate::schema::{FieldDefinition, FieldType, Schema};
use crate::value::Value;

/// A flattened record as exchanged with the store.
pub type FlatRecord = BTreeMap<String, String>;

/// Flatten an application document. Null and undefined members are left
/// out, since a flat record has no way to hold them.
pub fn to_flat_record(schema: &Schema, document: &Value) -> Result<FlatRecord, Error> {
    let Value::Map(map) = document else {
        return Err(Error::NotAnObject {
            found: describe(document),
        });
    };

    let mut record = FlatRecord::new();
    for (key, value) in map {
        if value.is_null() || value.is_undefined() {
            continue;
        }
        match schema.field(key) {
            Some(def) => {
                record.insert(
                    def.hash_field(key).to_string(),
                    known_to_string(key, def, value)?,
                );
            }
            None => {
                record.insert(key.clone(), unknown_to_string(key, value)?);
            }
        }
    }
    Ok(record)
}

/// Rebuild an application document from a flat record.
pub fn from_flat_record(schema: &Schema, record: &FlatRecord) -> Result<Value, Error> {
    let mut data: BTreeMap<String, Value> = record
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    for (name, def) in schema.fields() {
        let hash_field = def.hash_field(name);
        data.remove(hash_field);
        if let Some(text) = record.get(hash_field) {
            data.insert(name.to_string(), known_from_string(name, def, text)?);
        }
    }
    Ok(Value::Map(data))
}

fn flag(b: bool) -> String {
    let text = if b { "1" } else { "0" };
    text.to_string()
}

fn number_text(value: &Value) -> Option<String> {
    match value {
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        _ => None,
    }
}

fn known_to_string(name: &str, def: &FieldDefinition, value: &Value) -> Result<String, Error> {
    let at = def.hash_field(name);
    let invalid = || Error::invalid(name, &at, def.field_type, describe(value));
    match def.field_type {
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(flag(*b)),
            _ => Err(invalid()),
        },
        FieldType::Number => number_text(value).ok_or_else(invalid),
        FieldType::Date => {
            let epoch = encode_known(name, &at, FieldType::Date, value.clone())?;
            number_text(&epoch).ok_or_else(invalid)
        }
        FieldType::Point | FieldType::String | FieldType::Text => {
            match encode_known(name, &at, def.field_type, value.clone())? {
                Value::String(s) => Ok(s),
                _ => Err(invalid()),
            }
        }
        FieldType::StringArray => {
            let Value::Array(items) = value else {
                return Err(invalid());
            };
            let container = Location::from(vec![Step::key(name)]);
            let mut parts = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let element = container.child(Step::Index(index));
                match item {
                    Value::Null => return Err(null_in_array(name, &element, &container)),
                    Value::Undefined => {
                        return Err(Error::UndefinedInArray {
                            field: name.to_string(),
                            path: element.to_string(),
                            container: container.to_string(),
                        })
                    }
                    item => {
                        let coerced =
                            encode_known(name, &element, FieldType::StringArray, item.clone())?;
                        match coerced {
                            Value::String(s) => parts.push(s),
                            _ => return Err(invalid()),
                        }
                    }
                }
            }
            Ok(parts.join(def.separator()))
        }
    }
}

fn unknown_to_string(key: &str, value: &Value) -> Result<String, Error> {
    match value {
        Value::Bool(b) => Ok(flag(*b)),
        Value::Integer(_) | Value::Float(_) => {
            number_text(value).ok_or_else(|| unsupported(key, value))
        }
        Value::String(s) => Ok(s.clone()),
        Value::Date(date) => {
            number_text(&date_to_epoch(date)).ok_or_else(|| unsupported(key, value))
        }
        Value::Point(point) => Ok(point.to_string()),
        _ => Err(unsupported(key, value)),
    }
}

fn unsupported(key: &str, value: &Value) -> Error {
    Error::InvalidValue {
        field: key.to_string(),
        path: key.to_string(),
        field_type: "unknown".to_string(),
        value: describe(value),
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

fn known_from_string(name: &str, def: &FieldDefinition, text: &str) -> Result<Value, Error> {
    let at = def.hash_field(name);
    let invalid = || Error::invalid(name, &at, def.field_type, describe(&Value::from(text)));
    match def.field_type {
        FieldType::Boolean => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        FieldType::Number => parse_number(text).ok_or_else(invalid),
        FieldType::Date => parse_number(text)
            .and_then(|secs| epoch_to_date(&secs))
            .map(Value::Date)
            .ok_or_else(invalid),
        FieldType::Point => decode_known(name, &at, FieldType::Point, Value::from(text)),
        FieldType::String | FieldType::Text => Ok(Value::from(text)),
        FieldType::StringArray => {
            if text.is_empty() {
                return Ok(Value::array());
            }
            Ok(Value::Array(
                text.split(def.separator()).map(Value::from).collect(),
            ))
        }
    }
}
