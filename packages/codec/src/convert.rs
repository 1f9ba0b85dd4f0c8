//! Per-type guards and coercions shared by every direction of conversion.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::error::Error;
use crate::schema::FieldType;
use crate::value::{GeoPoint, Value};

lazy_static::lazy_static! {
    static ref POINT_STRING: Regex =
        Regex::new(r"^-?\d+(\.\d*)?,-?\d+(\.\d*)?$").expect("valid point pattern");
}

const MAX_LONGITUDE: f64 = 180.0;
const MAX_LATITUDE: f64 = 85.05112878;

/// Render any value for an error message. Never fails.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Date(date) => format!("date({})", date.to_rfc3339()),
        Value::Point(point) => format!(
            "point(longitude: {}, latitude: {})",
            point.longitude, point.latitude
        ),
        other => serde_json::to_string(&other.clone().into_json())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Canonical stored form of a date: epoch seconds, whole when possible.
pub fn date_to_epoch(date: &DateTime<Utc>) -> Value {
    let millis = date.timestamp_millis();
    if millis % 1000 == 0 {
        Value::Integer(millis / 1000)
    } else {
        Value::Float(millis as f64 / 1000.0)
    }
}

/// Read epoch seconds back into a date, at millisecond precision.
pub fn epoch_to_date(seconds: &Value) -> Option<DateTime<Utc>> {
    match seconds {
        Value::Integer(secs) => Utc.timestamp_opt(*secs, 0).single(),
        Value::Float(secs) if secs.is_finite() => {
            Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single()
        }
        _ => None,
    }
}

/// Parse an ISO-8601 date string. Strings without an offset are UTC.
pub fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// A geo-point, either the native variant or a `{longitude, latitude}` map.
pub fn as_point(value: &Value) -> Option<GeoPoint> {
    match value {
        Value::Point(point) => Some(*point),
        Value::Map(map) if map.len() == 2 => {
            let longitude = as_f64(map.get("longitude")?)?;
            let latitude = as_f64(map.get("latitude")?)?;
            Some(GeoPoint::new(longitude, latitude))
        }
        _ => None,
    }
}

/// Parse the canonical `lon,lat` string.
pub fn parse_point(s: &str) -> Option<GeoPoint> {
    if !POINT_STRING.is_match(s) {
        return None;
    }
    let (longitude, latitude) = s.split_once(',')?;
    Some(GeoPoint::new(longitude.parse().ok()?, latitude.parse().ok()?))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Integer(_) | Value::Float(_))
}

/// Text form of a boolean, number, or string.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn checked_point(field: &str, point: GeoPoint) -> Result<GeoPoint, Error> {
    let in_range = point.longitude.abs() <= MAX_LONGITUDE && point.latitude.abs() <= MAX_LATITUDE;
    if in_range {
        Ok(point)
    } else {
        Err(Error::PointOutOfRange {
            field: field.to_string(),
            longitude: point.longitude,
            latitude: point.latitude,
        })
    }
}

/// Coerce an application value into the stored form for its declared type.
///
/// Callers handle `Null` and `Undefined` before getting here. `at` names
/// where the value was found and is only used for errors.
pub fn encode_known(
    field: &str,
    at: &impl fmt::Display,
    field_type: FieldType,
    value: Value,
) -> Result<Value, Error> {
    let invalid = |value: &Value| Error::invalid(field, at, field_type, describe(value));
    match field_type {
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            other => Err(invalid(&other)),
        },
        FieldType::Number => match value {
            Value::Integer(_) | Value::Float(_) => Ok(value),
            other => Err(invalid(&other)),
        },
        FieldType::Date => match &value {
            Value::Date(date) => Ok(date_to_epoch(date)),
            Value::String(s) => parse_iso_date(s)
                .map(|date| date_to_epoch(&date))
                .ok_or_else(|| invalid(&value)),
            Value::Integer(_) | Value::Float(_) => Ok(value.clone()),
            other => Err(invalid(other)),
        },
        FieldType::Point => {
            let point = as_point(&value).ok_or_else(|| invalid(&value))?;
            Ok(Value::String(checked_point(field, point)?.to_string()))
        }
        FieldType::String | FieldType::Text | FieldType::StringArray => scalar_to_string(&value)
            .map(Value::String)
            .ok_or_else(|| invalid(&value)),
    }
}

/// Turn a stored value into the application value for its declared type.
///
/// Strict about canonical shapes, except that strings tolerate stored
/// booleans and numbers. Callers handle `Null` before getting here.
pub fn decode_known(
    field: &str,
    at: &impl fmt::Display,
    field_type: FieldType,
    value: Value,
) -> Result<Value, Error> {
    let invalid = |value: &Value| Error::invalid(field, at, field_type, describe(value));
    match field_type {
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            other => Err(invalid(&other)),
        },
        FieldType::Number => {
            if is_number(&value) {
                Ok(value)
            } else {
                Err(invalid(&value))
            }
        }
        FieldType::Date => epoch_to_date(&value)
            .map(Value::Date)
            .ok_or_else(|| invalid(&value)),
        FieldType::Point => match &value {
            Value::String(s) => parse_point(s)
                .map(Value::Point)
                .ok_or_else(|| invalid(&value)),
            other => Err(invalid(other)),
        },
        FieldType::String | FieldType::Text | FieldType::StringArray => scalar_to_string(&value)
            .map(Value::String)
            .ok_or_else(|| invalid(&value)),
    }
}
