use std::fmt;
use std::str::FromStr;

use crate::value::FieldValue;

/// On-the-wire encoding of a single schema entry.
///
/// All multi-byte types are little-endian, matching the firmware's packed
/// struct layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Int16,
    Int32,
    Float16,
    Float32,
    Bool,
    /// A packed group of `n` flag bits.
    Bits(u16),
}

impl WireType {
    /// Number of payload bytes this type occupies.
    pub fn width(self) -> usize {
        match self {
            WireType::Int16 | WireType::Float16 => 2,
            WireType::Int32 | WireType::Float32 => 4,
            WireType::Bool => 1,
            WireType::Bits(n) => usize::from(n).div_ceil(8),
        }
    }

    /// True for the integer encodings.
    pub fn is_integer(self) -> bool {
        matches!(self, WireType::Int16 | WireType::Int32)
    }

    /// Decode a scalar from exactly [`WireType::width`] bytes.
    ///
    /// Returns `None` for flag groups, which are expanded separately.
    pub(crate) fn decode(self, bytes: &[u8]) -> Option<FieldValue> {
        let value = match self {
            WireType::Int16 => FieldValue::Int(i64::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
            WireType::Int32 => FieldValue::Int(i64::from(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            WireType::Float16 => {
                FieldValue::Float(f64::from(f16_to_f32(u16::from_le_bytes([bytes[0], bytes[1]]))))
            }
            WireType::Float32 => FieldValue::Float(f64::from(f32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            WireType::Bool => FieldValue::Bool(bytes[0] != 0),
            WireType::Bits(_) => return None,
        };
        Some(value)
    }

    /// Encode an unscaled value. Integers saturate at the type's range.
    pub(crate) fn encode(self, raw: f64, flag: bool, dst: &mut Vec<u8>) {
        match self {
            WireType::Int16 => dst.extend_from_slice(&(raw.round() as i16).to_le_bytes()),
            WireType::Int32 => dst.extend_from_slice(&(raw.round() as i32).to_le_bytes()),
            WireType::Float16 => dst.extend_from_slice(&f32_to_f16(raw as f32).to_le_bytes()),
            WireType::Float32 => dst.extend_from_slice(&(raw as f32).to_le_bytes()),
            WireType::Bool => dst.push(u8::from(flag)),
            WireType::Bits(_) => {}
        }
    }
}

impl FromStr for WireType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int16" => Ok(WireType::Int16),
            "int32" => Ok(WireType::Int32),
            "float16" => Ok(WireType::Float16),
            "float32" => Ok(WireType::Float32),
            "bool" => Ok(WireType::Bool),
            other => other
                .strip_prefix("bits-")
                .and_then(|n| n.parse::<u16>().ok())
                .filter(|&n| n > 0)
                .map(WireType::Bits)
                .ok_or(()),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireType::Int16 => f.write_str("int16"),
            WireType::Int32 => f.write_str("int32"),
            WireType::Float16 => f.write_str("float16"),
            WireType::Float32 => f.write_str("float32"),
            WireType::Bool => f.write_str("bool"),
            WireType::Bits(n) => write!(f, "bits-{n}"),
        }
    }
}

/// Widen an IEEE-754 binary16 value.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1F);
    let mant = u32::from(bits & 0x3FF);

    let out = match exp {
        0 if mant == 0 => sign,
        0 => {
            let magnitude = mant as f32 * f32::powi(2.0, -24);
            return if sign != 0 { -magnitude } else { magnitude };
        }
        0x1F => sign | 0x7F80_0000 | (mant << 13),
        _ => sign | ((exp + 112) << 23) | (mant << 13),
    };
    f32::from_bits(out)
}

/// Narrow to IEEE-754 binary16, rounding to nearest even.
pub fn f32_to_f16(value: f32) -> u16 {
    let x = value.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xFF) as i32;
    let mant = x & 0x007F_FFFF;

    if exp == 0xFF {
        let nan = if mant != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | nan;
    }

    let e = exp - 112;
    if e >= 0x1F {
        return sign | 0x7C00;
    }

    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = mant | 0x0080_0000;
        let shift = (14 - e) as u32;
        let mut half = m >> shift;
        let rem = m & ((1 << shift) - 1);
        let midpoint = 1 << (shift - 1);
        if rem > midpoint || (rem == midpoint && half & 1 == 1) {
            half += 1;
        }
        return sign | half as u16;
    }

    let half_mant = mant >> 13;
    let rem = mant & 0x1FFF;
    let mut half = (u32::from(sign) | ((e as u32) << 10) | half_mant) as u16;
    if rem > 0x1000 || (rem == 0x1000 && half_mant & 1 == 1) {
        // Carry may ripple into the exponent, which is the correct rounding.
        half += 1;
    }
    half
}
