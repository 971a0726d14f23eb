//! Purpose: Convert features and schemas to and from the CLI's JSON shapes.
//! Exports: `feature_json`, `feature_from_json`, `schema_json`.
//! Role: JSON boundary of the binary; the library itself stays JSON-free.
//! Invariants: Feature objects carry `@id` plus one key per attribute (null when unset).
//! Invariants: Input values go through the same text decoder as file fields.
use std::sync::Arc;

use flatstore::api::{
    Error, ErrorKind, Feature, FeatureType, Value as FeatureValue, ValueKind, decode_value,
    encode_value,
};
use serde_json::{Map, Value, json};

pub(crate) fn feature_json(feature: &Feature) -> Value {
    let mut object = Map::new();
    object.insert(FeatureType::IDENTIFIER.to_string(), json!(feature.id()));
    for (attribute, value) in feature
        .feature_type()
        .attributes()
        .iter()
        .zip(feature.values())
    {
        object.insert(
            attribute.name.clone(),
            value.as_ref().map(value_json).unwrap_or(Value::Null),
        );
    }
    Value::Object(object)
}

fn value_json(value: &FeatureValue) -> Value {
    match value {
        FeatureValue::Integer(number) => json!(number),
        FeatureValue::Float(number) => json!(number),
        FeatureValue::Double(number) => json!(number),
        FeatureValue::Boolean(flag) => json!(flag),
        FeatureValue::String(text) => json!(text),
        FeatureValue::Date(_) | FeatureValue::Geometry(_) => json!(encode_value(value).ok()),
    }
}

/// Builds a feature from a JSON object keyed by attribute name. `@id` is ignored;
/// unknown keys are a usage error.
pub(crate) fn feature_from_json(
    feature_type: &Arc<FeatureType>,
    value: &Value,
) -> Result<Feature, Error> {
    let Some(object) = value.as_object() else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("feature must be a JSON object")
            .with_hint("Use an object keyed by attribute name, e.g. '{\"name\":\"A1\"}'."));
    };
    let mut feature = Feature::new(Arc::clone(feature_type));
    for (key, field) in object {
        if key == FeatureType::IDENTIFIER {
            continue;
        }
        let Some(attribute) = feature_type.attribute(key) else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown attribute {key:?}"))
                .with_attribute(key.as_str())
                .with_hint("Run `flatstore schema <file>` to list attributes."));
        };
        let decoded = match field {
            Value::Null => None,
            Value::String(text) => Some(decode_json_text(&attribute.kind, key, text)?),
            Value::Number(_) | Value::Bool(_) => {
                Some(decode_json_text(&attribute.kind, key, &field.to_string())?)
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("attribute values must be scalars")
                    .with_attribute(key.as_str()));
            }
        };
        feature.set(key, decoded)?;
    }
    Ok(feature)
}

fn decode_json_text(kind: &ValueKind, key: &str, text: &str) -> Result<FeatureValue, Error> {
    decode_value(kind, text).map_err(|reason| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("cannot convert {text:?} to {}: {reason}", kind.name()))
            .with_attribute(key)
    })
}

pub(crate) fn schema_json(feature_type: &FeatureType, separator: char) -> Value {
    let attributes = feature_type
        .attributes()
        .iter()
        .map(|attribute| {
            let mut object = Map::new();
            object.insert("name".to_string(), json!(attribute.name));
            object.insert("type".to_string(), json!(attribute.kind.name()));
            if let ValueKind::Geometry(crs) = &attribute.kind {
                object.insert("crs".to_string(), json!(crs.identifier()));
            }
            Value::Object(object)
        })
        .collect::<Vec<_>>();
    json!({
        "name": feature_type.name(),
        "attributes": attributes,
        "default_geometry": feature_type.default_geometry().map(|attribute| attribute.name.clone()),
        "header": flatstore::api::encode_header(feature_type, separator),
    })
}
