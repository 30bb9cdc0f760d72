use crate::error::{Result, SchemaError};
use crate::schema::{Schema, Slot};
use crate::value::Fields;

impl Schema {
    /// Encode named values into a payload of the given variant.
    ///
    /// This is the sender-side inverse of [`Schema::unpack`]: scaled values
    /// are divided by their multiplier and integer types are rounded to the
    /// nearest representable value. Every scalar in the variant's output
    /// order must be present. Flags that are absent, and reserved bits, are
    /// written as zero.
    pub fn pack(&self, variant: u8, fields: &Fields) -> Result<Vec<u8>> {
        let layout = self.layout_or_err(variant)?;
        let mut payload = Vec::with_capacity(layout.payload_len());

        for slot in layout.slots() {
            match slot {
                Slot::Flags { bits } => self.pack_flags(usize::from(*bits), fields, &mut payload),
                Slot::Scalar { name, wire, scale } => {
                    let value = fields.get(name).ok_or_else(|| SchemaError::MissingValue {
                        variant: char::from(variant),
                        key: name.clone(),
                    })?;
                    let raw = value.as_f64() / scale.unwrap_or(1.0);
                    wire.encode(raw, value.as_bool(), &mut payload);
                }
            }
        }

        debug_assert_eq!(payload.len(), layout.payload_len());
        Ok(payload)
    }

    fn pack_flags(&self, bits: usize, fields: &Fields, dst: &mut Vec<u8>) {
        let mut packed = vec![0u8; bits.div_ceil(8)];
        for (index, name) in self.flag_names().iter().take(bits).enumerate() {
            let set = name
                .as_deref()
                .and_then(|name| fields.get(name))
                .is_some_and(|value| value.as_bool());
            if set {
                packed[index / 8] |= 1 << (index % 8);
            }
        }
        dst.extend_from_slice(&packed);
    }
}
