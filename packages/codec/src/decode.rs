//! Stored JSON document to application value.

use tracing::trace;

use crate::convert::{decode_known, describe};
use crate::encode::null_in_array;
use crate::error::Error;
use crate::path::{Location, Step};
use crate::schema::{FieldDefinition, FieldType, Schema};
use crate::value::Value;

/// Convert a stored JSON document into an application document.
///
/// Stored values must already be in canonical form. Members the schema
/// does not know about are copied through untouched.
///
/// A single-valued field whose path matches more than once is not rejected
/// here, unlike [`crate::to_store_document`]: only the first match is
/// decoded. Stored documents are assumed to have been written through the
/// encoder.
pub fn from_store_document(
    schema: &Schema,
    document: &serde_json::Value,
) -> Result<Value, Error> {
    if !document.is_object() {
        return Err(Error::NotAnObject {
            found: describe(&Value::from_json(document.clone())),
        });
    }

    let mut data = Value::from_json(document.clone());
    for (name, def) in schema.fields() {
        decode_field(&mut data, name, def)?;
    }
    Ok(data)
}

fn decode_field(doc: &mut Value, name: &str, def: &FieldDefinition) -> Result<(), Error> {
    let path = def.json_path(name);
    let matches = path.resolve(doc);

    if def.field_type.is_array() {
        let single = matches.len() == 1;
        for location in &matches {
            decode_array_match(doc, name, location, single)?;
        }
        return Ok(());
    }

    let Some(first) = matches.first() else {
        return Ok(());
    };
    if matches.len() > 1 {
        trace!(field = name, path = %path, count = matches.len(), "decoding first match only");
    }
    let Some(slot) = doc.get_mut(first) else {
        return Ok(());
    };
    if slot.is_null() {
        return Ok(());
    }
    let value = std::mem::take(slot);
    *slot = decode_known(name, first, def.field_type, value)?;
    Ok(())
}

fn decode_array_match(
    doc: &mut Value,
    name: &str,
    location: &Location,
    single: bool,
) -> Result<(), Error> {
    let container = location.parent().unwrap_or_default();
    let in_array = matches!(doc.get(&container), Some(Value::Array(_)));

    match doc.get(location) {
        None => return Ok(()),
        Some(Value::Null) if single && !in_array => return Ok(()),
        Some(Value::Null) => return Err(null_in_array(name, location, &container)),
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
                if item.is_null() {
                    return Err(null_in_array(name, &element, location));
                }
                strings.push(decode_known(name, &element, FieldType::StringArray, item)?);
            }
            Value::Array(strings)
        }
        value => decode_known(name, location, FieldType::StringArray, value)?,
    };
    Ok(())
}
