//! Error types for conversions.

use std::fmt;

use crate::path::PathError;
use crate::schema::FieldType;

/// Errors raised while converting between application values and stored
/// forms. Every variant aborts the conversion; no partial result is kept.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The value does not have a shape the declared type accepts.
    #[error(
        "expected a value of type '{field_type}' for field '{field}' at '{path}' but received: \
         {value}"
    )]
    InvalidValue {
        field: String,
        path: String,
        field_type: String,
        value: String,
    },

    /// A single-valued field resolved to several locations.
    #[error("path '{path}' for field '{field}' points to many values, expected one")]
    TooManyMatches { field: String, path: String },

    /// A string array contained a null.
    #[error("null found in string array for field '{field}' at '{path}' (in {container})")]
    NullInArray {
        field: String,
        path: String,
        container: String,
    },

    /// A string array contained an absent element.
    #[error("undefined found in string array for field '{field}' at '{path}' (in {container})")]
    UndefinedInArray {
        field: String,
        path: String,
        container: String,
    },

    /// A geo-point outside the indexable range.
    #[error(
        "point for field '{field}' is out of range: longitude {longitude} must be within \
         ±180 and latitude {latitude} within ±85.05112878"
    )]
    PointOutOfRange {
        field: String,
        longitude: f64,
        latitude: f64,
    },

    /// Documents must be objects at the root.
    #[error("expected an object at the document root but received: {found}")]
    NotAnObject { found: String },

    /// Invalid path expression in a schema.
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

impl Error {
    pub(crate) fn invalid(
        field: &str,
        at: &impl fmt::Display,
        field_type: FieldType,
        value: String,
    ) -> Self {
        Error::InvalidValue {
            field: field.to_string(),
            path: at.to_string(),
            field_type: field_type.to_string(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_type_path_and_value() {
        let e = Error::invalid("age", &"$.person.age", FieldType::Number, "\"forty\"".to_string());
        let display = e.to_string();
        assert!(display.contains("'$.person.age'"));
        assert!(display.contains("'number'"));
        assert!(display.contains("'age'"));
        assert!(display.contains("\"forty\""));
    }

    #[test]
    fn too_many_matches_names_the_path() {
        let e = Error::TooManyMatches {
            field: "n".to_string(),
            path: "$.a[*]".to_string(),
        };
        assert!(e.to_string().contains("$.a[*]"));
        assert!(e.to_string().contains("many values"));
    }

    #[test]
    fn path_error_converts() {
        let e: Error = PathError::Empty.into();
        assert!(matches!(e, Error::Path(PathError::Empty)));
    }
}
