use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde_json::Value;

use crate::config::LoadConfig;
use crate::document::SchemaDocument;
use crate::error::{Result, SchemaError};
use crate::wire::WireType;

/// Output order key that consumes a packed group of status flag bits.
pub const FLAGS_KEY: &str = "Flags";

/// The schema shipped with the ground station, matching current firmware.
pub const BUNDLED_SCHEMA: &str = include_str!("../../../schema/packet_structure.json");

/// Wire description of one named field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub wire: WireType,
    pub multiplier: Option<f64>,
}

impl FieldSpec {
    /// The effective scale factor (1 when none is declared).
    pub fn scale(&self) -> f64 {
        self.multiplier.unwrap_or(1.0)
    }
}

/// One precompiled step of a variant's decode table.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Scalar {
        name: String,
        wire: WireType,
        /// `None` when the value is stored unscaled.
        scale: Option<f64>,
    },
    Flags {
        bits: u16,
    },
}

impl Slot {
    pub fn width(&self) -> usize {
        self.wire().width()
    }

    pub fn wire(&self) -> WireType {
        match self {
            Slot::Scalar { wire, .. } => *wire,
            Slot::Flags { bits } => WireType::Bits(*bits),
        }
    }

    /// The output order key this slot was compiled from.
    pub fn key(&self) -> &str {
        match self {
            Slot::Scalar { name, .. } => name,
            Slot::Flags { .. } => FLAGS_KEY,
        }
    }
}

/// Decode table for a single packet variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantLayout {
    variant: u8,
    slots: Vec<Slot>,
    offsets: Vec<usize>,
    payload_len: usize,
}

impl VariantLayout {
    pub fn variant(&self) -> u8 {
        self.variant
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Slots paired with their byte offset into the payload.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.offsets.iter().copied().zip(self.slots.iter())
    }

    /// Exact payload length a frame of this variant must carry.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }
}

/// A loaded, immutable schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    flag_names: Vec<Option<String>>,
    fields: BTreeMap<String, FieldSpec>,
    layouts: BTreeMap<u8, VariantLayout>,
}

impl Schema {
    /// Load a schema file with default config.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_path_with_config(path, LoadConfig::default())
    }

    /// Load a schema file with explicit config.
    pub fn from_path_with_config(path: &Path, config: LoadConfig) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
        let metadata = file
            .metadata()
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
        if !metadata.is_file() {
            return Err(SchemaError::LoadFailed(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if metadata.len() > config.max_schema_file_size as u64 {
            return Err(SchemaError::LoadFailed(format!(
                "schema file too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }

        let max_bytes = config.max_schema_file_size;
        let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| {
                SchemaError::LoadFailed(format!("failed reading {}: {err}", path.display()))
            })?;
        if content.len() > max_bytes {
            return Err(SchemaError::LoadFailed(format!(
                "schema file too large while reading: {}",
                path.display()
            )));
        }

        let schema = Self::from_json_str_with_config(&content, config)?;
        tracing::info!(
            path = %path.display(),
            variants = schema.layouts.len(),
            fields = schema.fields.len(),
            "schema loaded"
        );
        Ok(schema)
    }

    /// The schema compiled into this crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json_str(BUNDLED_SCHEMA)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json_str_with_config(json, LoadConfig::default())
    }

    pub fn from_json_str_with_config(json: &str, config: LoadConfig) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value, config)
    }

    pub fn from_value(value: &Value, config: LoadConfig) -> Result<Self> {
        let document = SchemaDocument::from_value(value, config.validate_document)?;
        Self::from_document(document)
    }

    /// Resolve type tags and compile one decode table per variant.
    pub fn from_document(document: SchemaDocument) -> Result<Self> {
        let mut fields = BTreeMap::new();
        for (name, entry) in document.fields {
            let wire: WireType =
                entry
                    .type_name
                    .parse()
                    .map_err(|()| SchemaError::UnknownType {
                        field: name.clone(),
                        type_name: entry.type_name.clone(),
                    })?;

            let is_flags = name == FLAGS_KEY;
            match wire {
                WireType::Bits(_) if !is_flags => {
                    return Err(SchemaError::InvalidDocument(format!(
                        "field {name}: bit groups are only allowed for {FLAGS_KEY}"
                    )));
                }
                WireType::Bits(_) => {}
                _ if is_flags => {
                    return Err(SchemaError::InvalidDocument(format!(
                        "{FLAGS_KEY} must use a bits-<N> type, found {wire}"
                    )));
                }
                _ => {}
            }

            if let Some(multiplier) = entry.multiplier {
                if !multiplier.is_finite() || multiplier == 0.0 {
                    return Err(SchemaError::InvalidDocument(format!(
                        "field {name}: multiplier must be finite and non-zero"
                    )));
                }
                if matches!(wire, WireType::Bool | WireType::Bits(_)) {
                    return Err(SchemaError::InvalidDocument(format!(
                        "field {name}: {wire} values cannot carry a multiplier"
                    )));
                }
            }

            fields.insert(
                name,
                FieldSpec {
                    wire,
                    multiplier: entry.multiplier,
                },
            );
        }

        let mut layouts = BTreeMap::new();
        for (variant, order) in document.output_orders {
            let layout = compile_layout(variant, &order, &fields)?;
            tracing::debug!(
                variant = %char::from(variant),
                slots = layout.slots.len(),
                payload_len = layout.payload_len,
                "compiled variant layout"
            );
            layouts.insert(variant, layout);
        }

        Ok(Self {
            flag_names: document.flags,
            fields,
            layouts,
        })
    }

    /// Ordered flag labels; `None` marks a reserved bit.
    pub fn flag_names(&self) -> &[Option<String>] {
        &self.flag_names
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Variant tags this schema can decode, in ascending order.
    pub fn variants(&self) -> impl Iterator<Item = u8> + '_ {
        self.layouts.keys().copied()
    }

    pub fn has_variant(&self, variant: u8) -> bool {
        self.layouts.contains_key(&variant)
    }

    pub fn layout(&self, variant: u8) -> Option<&VariantLayout> {
        self.layouts.get(&variant)
    }

    pub fn payload_len(&self, variant: u8) -> Option<usize> {
        self.layouts.get(&variant).map(VariantLayout::payload_len)
    }

    /// Payload length of the largest variant, or 0 for an empty schema.
    pub fn max_payload_len(&self) -> usize {
        self.layouts
            .values()
            .map(VariantLayout::payload_len)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn layout_or_err(&self, variant: u8) -> Result<&VariantLayout> {
        self.layouts
            .get(&variant)
            .ok_or(SchemaError::UnknownVariant(char::from(variant)))
    }
}

fn compile_layout(
    variant: u8,
    order: &[String],
    fields: &BTreeMap<String, FieldSpec>,
) -> Result<VariantLayout> {
    let mut slots = Vec::with_capacity(order.len());
    let mut offsets = Vec::with_capacity(order.len());
    let mut offset = 0usize;

    for key in order {
        let spec = fields.get(key).ok_or_else(|| SchemaError::UndefinedKey {
            variant: char::from(variant),
            key: key.clone(),
        })?;

        let slot = match spec.wire {
            WireType::Bits(bits) => Slot::Flags { bits },
            wire => Slot::Scalar {
                name: key.clone(),
                wire,
                scale: spec.multiplier.filter(|&m| m != 1.0),
            },
        };

        offsets.push(offset);
        offset += slot.width();
        slots.push(slot);
    }

    Ok(VariantLayout {
        variant,
        slots,
        offsets,
        payload_len: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"{
        "Flags": ["low", null, "high"],
        "Fields": {
            "Speed": {"type": "float32"},
            "Current": {"type": "int16", "multiplier": 0.1},
            "Count": {"type": "int32", "multiplier": 1},
            "Armed": {"type": "bool"},
            "Flags": {"type": "bits-3"}
        },
        "Output_Order_A": ["Speed", "Current", "Flags"],
        "Output_Order_B": ["Count", "Armed"]
    }"#;

    #[test]
    fn compiles_offsets_and_lengths() {
        let schema = Schema::from_json_str(SMALL).expect("valid schema");
        assert_eq!(schema.variants().collect::<Vec<_>>(), vec![b'A', b'B']);
        assert_eq!(schema.payload_len(b'A'), Some(4 + 2 + 1));
        assert_eq!(schema.payload_len(b'B'), Some(4 + 1));
        assert_eq!(schema.payload_len(b'C'), None);
        assert_eq!(schema.max_payload_len(), 7);

        let layout = schema.layout(b'A').expect("variant A");
        let entries: Vec<_> = layout
            .entries()
            .map(|(offset, slot)| (offset, slot.key().to_string()))
            .collect();
        assert_eq!(
            entries,
            vec![
                (0, "Speed".to_string()),
                (4, "Current".to_string()),
                (6, "Flags".to_string())
            ]
        );
    }

    #[test]
    fn unit_multiplier_is_not_a_scale() {
        let schema = Schema::from_json_str(SMALL).expect("valid schema");
        let layout = schema.layout(b'B').expect("variant B");
        assert_eq!(
            layout.slots()[0],
            Slot::Scalar {
                name: "Count".into(),
                wire: WireType::Int32,
                scale: None
            }
        );
        assert_eq!(schema.field("Current").map(FieldSpec::scale), Some(0.1));
    }

    #[test]
    fn undefined_output_key_is_rejected() {
        let json = r#"{
            "Fields": {"x": {"type": "int16"}},
            "Output_Order_A": ["x", "y"]
        }"#;
        assert!(matches!(
            Schema::from_json_str(json),
            Err(SchemaError::UndefinedKey { variant: 'A', ref key }) if key == "y"
        ));
    }

    #[test]
    fn bits_only_for_flags() {
        let json = r#"{
            "Fields": {"x": {"type": "bits-4"}},
            "Output_Order_A": ["x"]
        }"#;
        assert!(matches!(
            Schema::from_json_str(json),
            Err(SchemaError::InvalidDocument(_))
        ));

        let json = r#"{
            "Fields": {"Flags": {"type": "int16"}},
            "Output_Order_A": ["Flags"]
        }"#;
        assert!(matches!(
            Schema::from_json_str(json),
            Err(SchemaError::InvalidDocument(_))
        ));
    }

    #[test]
    fn unknown_type_reported_when_validation_is_off() {
        let config = LoadConfig {
            validate_document: false,
            ..LoadConfig::default()
        };
        let json = r#"{
            "Fields": {"x": {"type": "complex64"}},
            "Output_Order_A": ["x"]
        }"#;
        assert!(matches!(
            Schema::from_json_str_with_config(json, config),
            Err(SchemaError::UnknownType { ref field, .. }) if field == "x"
        ));
    }

    #[test]
    fn bundled_schema_compiles() {
        let schema = Schema::bundled().expect("bundled schema is valid");
        assert!(schema.has_variant(b'A'));
        assert!(schema.has_variant(b'B'));
        assert_eq!(schema.flag_names().len(), 64);
    }
}
