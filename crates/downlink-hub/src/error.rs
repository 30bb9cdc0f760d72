/// A decoded packet could not be merged into the snapshot.
///
/// Both cases mean the schema and the aggregation rules have drifted
/// apart. The packet is rejected as a whole and the snapshot keeps its
/// previous state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    /// A field the variant's rules depend on was not decoded.
    #[error("variant {variant:?} packet is missing required field {field}")]
    MissingField { variant: char, field: String },

    /// No aggregation rules exist for this variant.
    #[error("no aggregation rules for variant {0:?}")]
    UnsupportedVariant(char),
}

/// Errors raised by the hub's service, decoder thread and sinks.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("schema error: {0}")]
    Schema(#[from] downlink_schema::SchemaError),

    #[error("frame error: {0}")]
    Frame(#[from] downlink_frame::FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The aggregation task is no longer running.
    #[error("telemetry service stopped")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, HubError>;
