//! Schema definitions: field name to declared type and storage path.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::path::{JsonPath, PathError};
use crate::value::Value;

/// Separator used to join string arrays in flat records.
pub const DEFAULT_SEPARATOR: &str = "|";

/// The declared type of a field.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Deserialize)]
pub enum FieldType {
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "point")]
    Point,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "string[]")]
    StringArray,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Point => "point",
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::StringArray => "string[]",
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::StringArray)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Where the value lives in a stored document. `None` means the direct
    /// child named like the field.
    #[serde(default)]
    pub path: Option<JsonPath>,

    /// Name of the entry in a flat record. `None` means the field name.
    #[serde(default, rename = "field")]
    pub hash_field: Option<String>,

    /// Joins string arrays in flat records.
    #[serde(default)]
    pub separator: Option<String>,

    /// Value the object-construction layer uses when the field is missing.
    /// `None` means the field defaults to absence.
    #[serde(default, deserialize_with = "deserialize_default")]
    pub default: Option<Value>,
}

fn deserialize_default<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let json = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(json.map(Value::from_json))
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            path: None,
            hash_field: None,
            separator: None,
            default: None,
        }
    }

    /// Set an explicit storage path.
    pub fn with_path(mut self, expression: &str) -> Result<Self, PathError> {
        self.path = Some(JsonPath::parse(expression)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_hash_field(mut self, name: impl Into<String>) -> Self {
        self.hash_field = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The path this field resolves against, for a field called `name`.
    ///
    /// String arrays default to the elements of the direct child.
    pub fn json_path(&self, name: &str) -> Cow<'_, JsonPath> {
        match &self.path {
            Some(path) => Cow::Borrowed(path),
            None if self.field_type.is_array() => Cow::Owned(JsonPath::field_elements(name)),
            None => Cow::Owned(JsonPath::field(name)),
        }
    }

    pub fn hash_field<'a>(&'a self, name: &'a str) -> &'a str {
        self.hash_field.as_deref().unwrap_or(name)
    }

    pub fn separator(&self) -> &str {
        self.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR)
    }

    pub fn defaults_to_absence(&self) -> bool {
        self.default.is_none()
    }
}

impl From<FieldType> for FieldDefinition {
    fn from(field_type: FieldType) -> Self {
        FieldDefinition::new(field_type)
    }
}

/// An immutable mapping of field name to definition.
///
/// Fields are visited in name order. Distinct fields may point at
/// overlapping paths.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, FieldDefinition>,
}

impl Schema {
    pub fn new(fields: BTreeMap<String, FieldDefinition>) -> Self {
        Self { fields }
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parse a schema from its JSON definition form:
    /// `{ "name": { "type": "string", "path": "$.name" } }`.
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields.iter().map(|(name, def)| (name.as_str(), def))
    }

    /// Find the field stored under a flat-record entry name.
    pub fn field_by_hash_field(&self, hash_field: &str) -> Option<(&str, &FieldDefinition)> {
        self.fields()
            .find(|(name, def)| def.hash_field(name) == hash_field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Incremental construction of a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: BTreeMap<String, FieldDefinition>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, def: impl Into<FieldDefinition>) -> Self {
        self.fields.insert(name.into(), def.into());
        self
    }

    /// Add a field with an explicit path expression.
    pub fn field_at(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        path: &str,
    ) -> Result<Self, PathError> {
        let def = FieldDefinition::new(field_type).with_path(path)?;
        Ok(self.field(name, def))
    }

    pub fn build(self) -> Schema {
        Schema::new(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_paths_follow_the_field_type() {
        let def = FieldDefinition::new(FieldType::String);
        assert_eq!(def.json_path("name").as_str(), "$.name");

        let def = FieldDefinition::new(FieldType::StringArray);
        assert_eq!(def.json_path("tags").as_str(), "$.tags[*]");

        let def = FieldDefinition::new(FieldType::Number)
            .with_path("$.stats.count")
            .unwrap();
        assert_eq!(def.json_path("count").as_str(), "$.stats.count");
    }

    #[test]
    fn builder_rejects_bad_paths() {
        assert!(Schema::builder()
            .field_at("x", FieldType::Number, "x.y")
            .is_err());
    }

    #[test]
    fn parses_json_definitions() {
        let schema = Schema::from_json(json!({
            "name": { "type": "string" },
            "tags": { "type": "string[]", "separator": "," },
            "city": { "type": "text", "path": "$.address.city", "field": "town" },
            "active": { "type": "boolean", "default": true },
        }))
        .unwrap();

        assert_eq!(schema.len(), 4);
        let city = schema.field("city").unwrap();
        assert_eq!(city.field_type, FieldType::Text);
        assert_eq!(city.json_path("city").as_str(), "$.address.city");
        assert_eq!(city.hash_field("city"), "town");
        assert_eq!(schema.field("tags").unwrap().separator(), ",");
        assert_eq!(schema.field("name").unwrap().separator(), "|");
        assert!(schema.field("name").unwrap().defaults_to_absence());
        assert_eq!(
            schema.field("active").unwrap().default,
            Some(Value::Bool(true))
        );
        assert_eq!(schema.field_by_hash_field("town").unwrap().0, "city");
    }

    #[test]
    fn rejects_unknown_types_and_paths() {
        assert!(Schema::from_json(json!({ "x": { "type": "blob" } })).is_err());
        assert!(Schema::from_json(json!({ "x": { "type": "string", "path": "$..x" } })).is_err());
    }

    #[test]
    fn fields_iterate_in_name_order() {
        let schema = Schema::builder()
            .field("b", FieldType::Number)
            .field("a", FieldType::Boolean)
            .build();
        let names: Vec<&str> = schema.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
