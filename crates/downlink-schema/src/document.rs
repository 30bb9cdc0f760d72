//! The on-disk schema document and its structural validation.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Prefix of the per-variant output order keys, e.g. `Output_Order_A`.
pub const OUTPUT_ORDER_PREFIX: &str = "Output_Order_";

/// JSON Schema the document must satisfy before a decode table is built.
const DOCUMENT_SCHEMA: &str = r#"{
    "$schema": "https://json-schema.org/draft/2020-12/schema",
    "type": "object",
    "required": ["Fields"],
    "properties": {
        "version": { "type": "string" },
        "description": { "type": "string" },
        "Flags": {
            "type": "array",
            "items": { "type": ["string", "null"], "minLength": 1 }
        },
        "Fields": {
            "type": "object",
            "additionalProperties": {
                "type": "object",
                "required": ["type"],
                "properties": {
                    "type": {
                        "type": "string",
                        "pattern": "^(int16|int32|float16|float32|bool|bits-[1-9][0-9]*)$"
                    },
                    "multiplier": { "type": "number", "not": { "const": 0 } }
                },
                "additionalProperties": false
            }
        }
    },
    "patternProperties": {
        "^Output_Order_.$": {
            "type": "array",
            "items": { "type": "string", "minLength": 1 }
        }
    },
    "additionalProperties": false
}"#;

/// One `Fields` entry as written in the document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldEntry {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub multiplier: Option<f64>,
}

/// The parsed document, before type tags are resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaDocument {
    pub flags: Vec<Option<String>>,
    pub fields: BTreeMap<String, FieldEntry>,
    pub output_orders: BTreeMap<u8, Vec<String>>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(rename = "Flags", default)]
    flags: Vec<Option<String>>,
    #[serde(rename = "Fields")]
    fields: BTreeMap<String, FieldEntry>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

impl SchemaDocument {
    /// Parse a document, optionally checking it against the embedded
    /// JSON Schema first.
    pub fn from_value(value: &Value, validate: bool) -> Result<Self> {
        if validate {
            validate_structure(value)?;
        }

        let raw: RawDocument = serde_json::from_value(value.clone())
            .map_err(|err| SchemaError::InvalidDocument(err.to_string()))?;

        let mut output_orders = BTreeMap::new();
        for (key, order) in raw.rest {
            let Some(suffix) = key.strip_prefix(OUTPUT_ORDER_PREFIX) else {
                // Metadata such as `version` passes through untouched.
                continue;
            };
            let variant = parse_variant_suffix(suffix).ok_or_else(|| {
                SchemaError::InvalidDocument(format!(
                    "{key}: variant suffix must be a single printable ASCII character"
                ))
            })?;
            let order: Vec<String> = serde_json::from_value(order)
                .map_err(|err| SchemaError::InvalidDocument(format!("{key}: {err}")))?;
            output_orders.insert(variant, order);
        }

        if output_orders.is_empty() {
            return Err(SchemaError::InvalidDocument(
                "document defines no Output_Order_<variant> lists".to_string(),
            ));
        }

        Ok(Self {
            flags: raw.flags,
            fields: raw.fields,
            output_orders,
        })
    }
}

fn parse_variant_suffix(suffix: &str) -> Option<u8> {
    match suffix.as_bytes() {
        [byte] if byte.is_ascii_graphic() => Some(*byte),
        _ => None,
    }
}

fn validate_structure(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(DOCUMENT_SCHEMA)?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|err| SchemaError::InvalidDocument(format!("document schema: {err}")))?;

    let mut errors = validator.iter_errors(value);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::InvalidDocument(message));
    }

    Ok(())
}
