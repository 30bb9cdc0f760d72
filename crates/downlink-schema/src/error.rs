/// Errors raised while loading a schema or decoding against it.
///
/// Everything here indicates that the ground station and the vehicle
/// firmware disagree about the wire format; none of it is recoverable by
/// retrying.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema file could not be read.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema document is not valid JSON.
    #[error("schema is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The document's shape is wrong (missing sections, bad entries).
    #[error("invalid schema document: {0}")]
    InvalidDocument(String),

    /// A field declares a wire type the decoder does not know.
    #[error("field {field} has unknown wire type {type_name:?}")]
    UnknownType { field: String, type_name: String },

    /// An output order references a key that `Fields` does not define.
    #[error("variant {variant:?} references undefined field {key}")]
    UndefinedKey { variant: char, key: String },

    /// A frame carried a variant tag with no output order.
    #[error("unknown packet variant {0:?}")]
    UnknownVariant(char),

    /// The payload length disagrees with the variant's decode table.
    #[error("variant {variant:?} payload is {actual} bytes, schema expects {expected}")]
    LengthMismatch {
        variant: char,
        expected: usize,
        actual: usize,
    },

    /// A value required to encode a payload was not supplied.
    #[error("variant {variant:?} is missing a value for {key}")]
    MissingValue { variant: char, key: String },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
