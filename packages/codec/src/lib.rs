//! docmap codec: schema-driven conversion between typed application values
//! and the stored forms of a document-oriented key-value store.
//!
//! - `Value`: the application-side tree, with dates and geo-points
//! - `Schema`: field name to declared type and storage path
//! - `JsonPath`: the restricted path language fields are located with
//! - `to_store_document` / `from_store_document`: JSON document forms
//! - `to_flat_record` / `from_flat_record`: flattened field-map forms
//!
//! Everything here is pure and synchronous. Inputs are never modified.
//!
//! # Example
//!
//! ```rust
//! use docmap_codec::{from_store_document, to_store_document, FieldType, Schema, Value};
//! use serde_json::json;
//!
//! let schema = Schema::builder()
//!     .field("title", FieldType::Text)
//!     .field("tags", FieldType::StringArray)
//!     .field_at("city", FieldType::String, "$.address.city")
//!     .unwrap()
//!     .build();
//!
//! let stored = json!({ "title": "Dune", "tags": ["sf", 1965], "address": { "city": "Arrakeen" } });
//! let data = from_store_document(&schema, &stored).unwrap();
//! assert_eq!(to_store_document(&schema, &data).unwrap()["tags"], json!(["sf", "1965"]));
//! ```

mod convert;
mod decode;
mod encode;
mod error;
mod flat;
mod path;
mod schema;
mod value;

pub use convert::{date_to_epoch, describe, epoch_to_date, parse_iso_date, parse_point};
pub use decode::from_store_document;
pub use encode::to_store_document;
pub use error::Error;
pub use flat::{from_flat_record, to_flat_record, FlatRecord};
pub use path::{JsonPath, Location, PathError, Segment, Step};
pub use schema::{FieldDefinition, FieldType, Schema, SchemaBuilder, DEFAULT_SEPARATOR};
pub use value::{GeoPoint, Value};
