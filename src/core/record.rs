//! Purpose: Typed feature values and the conversion between records and text fields.
//! Exports: `Value`, `Feature`, `decode_value`, `encode_value`, `decode_record`, `encode_record`.
//! Role: Sits between the tokenizer and the reader/writer; owns all text <-> value rules.
//! Invariants: A feature always holds exactly one slot per attribute of its type.
//! Invariants: Encoding then decoding a feature yields equal values (null included).
//! Invariants: Dates held by a feature always have an RFC 3339 form once moved to UTC.
use std::fmt;
use std::sync::Arc;

use geo_types::Geometry;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::core::error::{Error, ErrorKind};
use crate::core::geometry::{parse_wkt, to_wkt};
use crate::core::schema::{FeatureType, ValueKind};
use crate::core::tokenize::{Field, escape_field};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i32),
    Float(f32),
    Double(f64),
    String(String),
    Date(OffsetDateTime),
    Boolean(bool),
    Geometry(Geometry<f64>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::Date(_) => "Date",
            Value::Boolean(_) => "Boolean",
            Value::Geometry(_) => "Geometry",
        }
    }

    pub fn matches(&self, kind: &ValueKind) -> bool {
        matches!(
            (self, kind),
            (Value::Integer(_), ValueKind::Integer)
                | (Value::Float(_), ValueKind::Float)
                | (Value::Double(_), ValueKind::Double)
                | (Value::String(_), ValueKind::String)
                | (Value::Date(_), ValueKind::Date)
                | (Value::Boolean(_), ValueKind::Boolean)
                | (Value::Geometry(_), ValueKind::Geometry(_))
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry<f64>> {
        match self {
            Value::Geometry(geometry) => Some(geometry),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match encode_value(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Date(value)
    }
}

impl From<Geometry<f64>> for Value {
    fn from(value: Geometry<f64>) -> Self {
        Value::Geometry(value)
    }
}

impl From<geo_types::Point<f64>> for Value {
    fn from(value: geo_types::Point<f64>) -> Self {
        Value::Geometry(Geometry::Point(value))
    }
}

/// One record of a store. The id is assigned when the record is read or appended
/// and is not persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    id: u64,
    feature_type: Arc<FeatureType>,
    values: Vec<Option<Value>>,
}

impl Feature {
    /// All attributes null.
    pub fn new(feature_type: Arc<FeatureType>) -> Self {
        let values = vec![None; feature_type.len()];
        Self {
            id: 0,
            feature_type,
            values,
        }
    }

    pub(crate) fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Value of attribute `name`; `None` when null or unknown.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.feature_type
            .index_of(name)
            .and_then(|index| self.value(index))
    }

    pub fn set(&mut self, name: &str, value: impl Into<Option<Value>>) -> Result<(), Error> {
        let index = self.feature_type.index_of(name).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("unknown attribute")
                .with_attribute(name)
        })?;
        self.set_at(index, value.into())
    }

    pub fn set_at(&mut self, index: usize, value: Option<Value>) -> Result<(), Error> {
        let attribute = self.feature_type.attributes().get(index).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("attribute index {index} out of range"))
        })?;
        let mismatch = value
            .as_ref()
            .filter(|value| !value.matches(&attribute.kind));
        if let Some(value) = mismatch {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "expected {} value, got {}",
                    attribute.kind.name(),
                    value.kind_name()
                ))
                .with_attribute(&attribute.name));
        }
        if let Some(Value::Date(date)) = &value {
            format_date(date).map_err(|reason| {
                Error::new(ErrorKind::Usage)
                    .with_message(reason)
                    .with_attribute(&attribute.name)
                    .with_hint("Dates must fall between years 0 and 9999 in UTC.")
            })?;
        }
        self.values[index] = value;
        Ok(())
    }

    /// Builder form of [`Feature::set`].
    pub fn with(mut self, name: &str, value: impl Into<Option<Value>>) -> Result<Self, Error> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn default_geometry(&self) -> Option<&Geometry<f64>> {
        self.feature_type
            .default_geometry_index()
            .and_then(|index| self.value(index))
            .and_then(Value::as_geometry)
    }

    /// Copies the values of `other`, which must have the same columns.
    pub(crate) fn assign_from(&mut self, other: Feature) -> Result<(), Error> {
        if !self.feature_type.same_columns(&other.feature_type) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("feature does not match the store schema")
                .with_hint("Build features from the store's schema()."));
        }
        self.values = other.values;
        Ok(())
    }
}

/// Converts the text of one field into a value of `kind`.
pub fn decode_value(kind: &ValueKind, text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    match kind {
        ValueKind::String => Ok(Value::String(text.to_string())),
        ValueKind::Integer => trimmed
            .parse::<i32>()
            .map(Value::Integer)
            .map_err(|err| err.to_string()),
        ValueKind::Float => trimmed
            .parse::<f32>()
            .map(Value::Float)
            .map_err(|err| err.to_string()),
        ValueKind::Double => trimmed
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|err| err.to_string()),
        ValueKind::Boolean => parse_boolean(trimmed)
            .map(Value::Boolean)
            .ok_or_else(|| "expected true or false".to_string()),
        ValueKind::Date => {
            let date = parse_date(trimmed)?;
            format_date(&date)?;
            Ok(Value::Date(date))
        }
        ValueKind::Geometry(_) => parse_wkt(trimmed).map(Value::Geometry),
    }
}

/// Text form of `value`, as `decode_value` reads it back. Fails only for dates
/// outside the RFC 3339 range.
pub fn encode_value(value: &Value) -> Result<String, String> {
    Ok(match value {
        Value::Integer(number) => number.to_string(),
        Value::Float(number) => number.to_string(),
        Value::Double(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Date(date) => format_date(date)?,
        Value::Boolean(flag) => flag.to_string(),
        Value::Geometry(geometry) => to_wkt(geometry),
    })
}

// Written in UTC: RFC 3339 has no room for offsets with seconds.
fn format_date(date: &OffsetDateTime) -> Result<String, String> {
    let utc = date
        .checked_to_offset(UtcOffset::UTC)
        .ok_or_else(|| format!("date {date} has no UTC form"))?;
    utc.format(&Rfc3339)
        .map_err(|err| format!("date {date} has no RFC 3339 form: {err}"))
}

fn parse_boolean(text: &str) -> Option<bool> {
    const TRUE: &[&str] = &["true", "yes", "on", "1"];
    const FALSE: &[&str] = &["false", "no", "off", "0"];
    if TRUE.iter().any(|word| word.eq_ignore_ascii_case(text)) {
        return Some(true);
    }
    if FALSE.iter().any(|word| word.eq_ignore_ascii_case(text)) {
        return Some(false);
    }
    None
}

const BARE_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

fn parse_date(text: &str) -> Result<OffsetDateTime, String> {
    if let Ok(date) = OffsetDateTime::parse(text, &Rfc3339) {
        return Ok(date);
    }
    Date::parse(text, BARE_DATE)
        .map(|date| date.midnight().assume_utc())
        .map_err(|err| err.to_string())
}

/// Builds a feature from positional fields. Missing trailing fields are null.
pub fn decode_record(
    feature_type: &Arc<FeatureType>,
    id: u64,
    fields: &[Field],
) -> Result<Feature, Error> {
    let mut feature = Feature::new(Arc::clone(feature_type)).with_id(id);
    for (index, attribute) in feature_type.attributes().iter().enumerate() {
        let Some(field) = fields.get(index) else {
            break;
        };
        if field.is_blank() {
            continue;
        }
        if field.text.is_empty() && attribute.kind != ValueKind::String {
            continue;
        }
        let value = decode_value(&attribute.kind, &field.text).map_err(|reason| {
            Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "cannot convert {:?} to {}: {reason}",
                    field.text,
                    attribute.kind.name()
                ))
                .with_attribute(&attribute.name)
        })?;
        feature.values[index] = Some(value);
    }
    Ok(feature)
}

/// Record line (without terminator) for `feature`. Null values become empty fields.
pub fn encode_record(feature: &Feature, separator: char) -> Result<String, Error> {
    let mut out = String::new();
    let attributes = feature.feature_type().attributes();
    for (index, value) in feature.values().iter().enumerate() {
        if index > 0 {
            out.push(separator);
        }
        if let Some(value) = value {
            let text = encode_value(value).map_err(|reason| {
                let err = Error::new(ErrorKind::Usage).with_message(reason);
                match attributes.get(index) {
                    Some(attribute) => err.with_attribute(&attribute.name),
                    None => err,
                }
            })?;
            out.push_str(&escape_field(&text, separator));
        }
    }
    Ok(out)
}
