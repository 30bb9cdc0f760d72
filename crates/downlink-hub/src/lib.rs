//! Aggregation and fan-out of decoded telemetry.
//!
//! A [`TelemetryService`] task owns the [`Aggregator`] (snapshot plus
//! bounded history) and the [`BroadcastHub`]. Packets arrive from a decode
//! thread started with [`spawn_decoder`]; HTTP and WebSocket handlers talk
//! to the task through a cloneable [`ServiceHandle`].

pub mod aggregator;
pub mod config;
pub mod decoder;
pub mod error;
pub mod history;
pub mod hub;
pub mod message;
pub mod reading;
pub mod service;
pub mod sink;
pub mod snapshot;
pub mod synth;

pub use aggregator::{haversine_km, Aggregator, Update, VARIANT_BATTERY, VARIANT_MOTOR};
pub use config::{HubConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_PACKET_QUEUE, DEFAULT_SINK_QUEUE};
pub use decoder::{fit_frame_config, run_decoder, spawn_decoder, DecoderExit, DecoderReport};
pub use error::{AggregateError, HubError, Result};
pub use history::{History, HistoryPoint, HistoryValue};
pub use hub::{BroadcastHub, PublishReport, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use message::{Message, Payload, StateView};
pub use reading::Reading;
pub use service::{Command, ServiceHandle, ServiceStats, TelemetryService};
pub use sink::{open_sink, spawn_sink, CsvSink, JsonlSink, Sink, SinkFormat, SinkHandle, SinkRecord};
pub use snapshot::Snapshot;
pub use synth::synthetic_fields;
