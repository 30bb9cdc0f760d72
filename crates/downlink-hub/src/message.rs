use std::sync::Arc;

use serde::Serialize;

use crate::history::{History, HistoryPoint};
use crate::snapshot::Snapshot;

/// A serialized message, shared by every subscriber it is sent to.
pub type Payload = Arc<str>;

/// Messages pushed over a subscription channel.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message<'a> {
    /// Full state, sent once when a subscriber joins.
    Data {
        metric: &'a Snapshot,
        historic: &'a History,
    },
    /// One aggregation cycle: the new snapshot and what history gained.
    Update {
        metric: &'a Snapshot,
        historic: &'a HistoryPoint,
    },
}

/// Body of the query endpoint.
#[derive(Debug, Serialize)]
pub struct StateView<'a> {
    pub metric: &'a Snapshot,
    pub historic: &'a History,
}

pub fn encode<T: Serialize>(message: &T) -> serde_json::Result<Payload> {
    serde_json::to_string(message).map(Payload::from)
}
