//! Application value to stored JSON document.

use tracing::trace;

use crate::convert::{date_to_epoch, describe, encode_known};
use crate::error::Error;
use crate::path::{JsonPath, Location, Step};
use crate::schema::{FieldDefinition, FieldType, Schema};
use crate::value::Value;

/// Convert an application document into its stored JSON form.
///
/// The input is never modified: conversion rewrites a private copy in place
/// and then lowers it to JSON.
///
/// # Example
///
/// ```rust
/// use docmap_codec::{to_store_document, FieldType, Schema, Value};
/// use serde_json::json;
///
/// let schema = Schema::builder()
///     .field("name", FieldType::String)
///     .field("age", FieldType::Number)
///     .build();
/// let doc = Value::map().with("name", 42).with("age", 7);
///
/// let stored = to_store_document(&schema, &doc).unwrap();
/// assert_eq!(stored, json!({ "name": "42", "age": 7 }));
/// ```
pub fn to_store_document(schema: &Schema, document: &Value) -> Result<serde_json::Value, Error> {
    if !document.is_map() {
        return Err(Error::NotAnObject {
            found: describe(document),
        });
    }

    let mut copy = document.clone();
    for (name, def) in schema.fields() {
        encode_field(&mut copy, name, def)?;
    }
    normalize_unknown(&mut copy);
    Ok(copy.into_json())
}

fn encode_field(doc: &mut Value, name: &str, def: &FieldDefinition) -> Result<(), Error> {
    let path = def.json_path(name);
    let matches = path.resolve(doc);

    if def.field_type.is_array() {
        let single = matches.len() == 1;
        for location in &matches {
            encode_array_match(doc, name, &path, location, single)?;
        }
        return Ok(());
    }

    match matches.as_slice() {
        [] => {
            trace!(field = name, path = %path, "no value to encode");
            Ok(())
        }
        [location] => encode_single(doc, name, def.field_type, location),
        _ => Err(Error::TooManyMatches {
            field: name.to_string(),
            path: path.to_string(),
        }),
    }
}

fn encode_single(
    doc: &mut Value,
    name: &str,
    field_type: FieldType,
    location: &Location,
) -> Result<(), Error> {
    match doc.get(location) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Undefined) => {
            doc.remove(location);
            return Ok(());
        }
        Some(_) => {}
    }
    if let Some(slot) = doc.get_mut(location) {
        let value = std::mem::take(slot);
        *slot = encode_known(name, location, field_type, value)?;
    }
    Ok(())
}

/// One match of a string-array field. Elements of arrays may be neither
/// null nor undefined; an undefined object member is dropped.
fn encode_array_match(
    doc: &mut Value,
    name: &str,
    path: &JsonPath,
    location: &Location,
    single: bool,
) -> Result<(), Error> {
    let container = location.parent().unwrap_or_default();
    let in_array = matches!(doc.get(&container), Some(Value::Array(_)));

    match doc.get(location) {
        None => return Ok(()),
        Some(Value::Null) if single && !in_array => return Ok(()),
        Some(Value::Null) => return Err(null_in_array(name, location, &container)),
        Some(Value::Undefined) if in_array => {
            return Err(Error::UndefinedInArray {
                field: name.to_string(),
                path: location.to_string(),
                container: container.to_string(),
            })
        }
        Some(Value::Undefined) => {
            doc.remove(location);
            return Ok(());
        }
        Some(_) => {}
    }

    let Some(slot) = doc.get_mut(location) else {
        return Ok(());
    };
    let value = std::mem::take(slot);
    *slot = match value {
        Value::Array(items) => {
            let mut strings = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let element = location.child(Step::Index(index));
                match item {
                    Value::Null => return Err(null_in_array(name, &element, location)),
                    Value::Undefined => {
                        return Err(Error::UndefinedInArray {
                            field: name.to_string(),
                            path: element.to_string(),
                            container: location.to_string(),
                        })
                    }
                    item => {
                        strings.push(encode_known(name, &element, FieldType::StringArray, item)?)
                    }
                }
            }
            Value::Array(strings)
        }
        value => encode_known(name, location, FieldType::StringArray, value)?,
    };
    trace!(field = name, path = %path, at = %location, "encoded string array match");
    Ok(())
}

pub(crate) fn null_in_array(name: &str, at: &Location, container: &Location) -> Error {
    Error::NullInArray {
        field: name.to_string(),
        path: at.to_string(),
        container: container.to_string(),
    }
}

/// Pass over everything the schema left alone: drop undefined members,
/// recurse into objects, and store any date as epoch seconds.
fn normalize_unknown(value: &mut Value) {
    let Value::Map(map) = value else {
        return;
    };
    map.retain(|_, v| !v.is_undefined());
    for (key, member) in map.iter_mut() {
        match member {
            Value::Map(_) => normalize_unknown(member),
            Value::Date(date) => {
                trace!(key = key.as_str(), "storing unknown date as epoch seconds");
                *member = date_to_epoch(date);
            }
            _ => {}
        }
    }
}
