use crate::error::{Result, SchemaError};
use crate::schema::{Schema, Slot};
use crate::value::{DecodedPacket, FieldValue, Fields};

impl Schema {
    /// Decode a payload of the given variant into named values.
    ///
    /// The payload must be exactly as long as the variant's decode table;
    /// anything else means the firmware and this schema have diverged.
    pub fn unpack(&self, variant: u8, payload: &[u8]) -> Result<DecodedPacket> {
        let layout = self.layout_or_err(variant)?;
        if payload.len() != layout.payload_len() {
            return Err(SchemaError::LengthMismatch {
                variant: char::from(variant),
                expected: layout.payload_len(),
                actual: payload.len(),
            });
        }

        let mut fields = Fields::with_capacity(layout.slots().len());
        for (offset, slot) in layout.entries() {
            let bytes = &payload[offset..offset + slot.width()];
            match slot {
                Slot::Flags { bits } => {
                    let expanded = expand_bits(bytes, usize::from(*bits));
                    for (name, value) in unpack_flags(&expanded, self.flag_names()) {
                        fields.insert(name, value);
                    }
                }
                Slot::Scalar { name, wire, scale } => {
                    if let Some(value) = wire.decode(bytes) {
                        fields.insert(name.as_str(), apply_scale(value, *scale));
                    }
                }
            }
        }

        Ok(DecodedPacket::new(variant, fields))
    }
}

fn apply_scale(value: FieldValue, scale: Option<f64>) -> FieldValue {
    match (value, scale) {
        (FieldValue::Int(v), Some(s)) => FieldValue::Float(v as f64 * s),
        (FieldValue::Float(v), Some(s)) => FieldValue::Float(v * s),
        (other, _) => other,
    }
}

/// Expand bytes into bits, least significant bit first within each byte,
/// keeping exactly `count` of them.
pub fn expand_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .take(count)
        .collect()
}

/// Pair bits with their flag names, skipping reserved (`None`) slots.
///
/// Extra bits or extra names beyond the shorter of the two are ignored.
pub fn unpack_flags<'a>(
    bits: &[bool],
    names: &'a [Option<String>],
) -> impl Iterator<Item = (&'a str, bool)> + 'a {
    let bits = bits.to_vec();
    names
        .iter()
        .zip(bits)
        .filter_map(|(name, bit)| name.as_deref().map(|name| (name, bit)))
}
