//! Ground-station side of a vehicle telemetry radio link.
//!
//! Bytes arrive from a serial radio, are cut into CRC-checked frames,
//! unpacked against a JSON packet schema, folded into a live snapshot with
//! bounded history, and pushed to any number of dashboard subscribers.
//!
//! # Crate Structure
//!
//! - [`transport`]: bounded-wait byte sources (serial tty, readers, memory)
//! - [`frame`]: magic/length/CRC framing and resynchronisation
//! - [`schema`]: packet schema loading and field unpacking
//! - [`hub`]: aggregation, history, broadcast and persistence sinks

/// Re-export transport types.
pub mod transport {
    pub use downlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use downlink_frame::*;
}

/// Re-export schema types.
pub mod schema {
    pub use downlink_schema::*;
}

/// Re-export aggregation and fan-out types.
pub mod hub {
    pub use downlink_hub::*;
}
