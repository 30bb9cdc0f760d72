//! Schema-driven unpacking of telemetry payloads.
//!
//! A schema document names every field on the wire, its type and scale,
//! the ordered list of status flags, and one output order per packet
//! variant. It is loaded once at startup and compiled into a per-variant
//! decode table; after that, unpacking a payload is a single pass over a
//! precomputed slot list.

pub mod config;
pub mod document;
pub mod error;
pub mod pack;
pub mod schema;
pub mod unpack;
pub mod value;
pub mod wire;

pub use config::LoadConfig;
pub use document::{FieldEntry, SchemaDocument, OUTPUT_ORDER_PREFIX};
pub use error::{Result, SchemaError};
pub use schema::{FieldSpec, Schema, Slot, VariantLayout, BUNDLED_SCHEMA, FLAGS_KEY};
pub use unpack::{expand_bits, unpack_flags};
pub use value::{serialize_finite, DecodedPacket, FieldValue, Fields};
pub use wire::{f16_to_f32, f32_to_f16, WireType};
