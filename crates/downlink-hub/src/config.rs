use crate::hub::DEFAULT_SUBSCRIBER_BUFFER;

/// Default number of entries kept per history series.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Default depth of the decoder → aggregator hand-off queue.
pub const DEFAULT_PACKET_QUEUE: usize = 256;

/// Default depth of the persistence sink queue.
pub const DEFAULT_SINK_QUEUE: usize = 1024;

/// Sizing for the aggregation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Ring buffer length of each history series.
    pub history_capacity: usize,
    /// Messages queued per subscriber before it is disconnected as lagging.
    pub subscriber_buffer: usize,
    /// Decoded packets queued between the decode thread and the aggregator.
    /// A full queue blocks the decode thread.
    pub packet_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            packet_queue: DEFAULT_PACKET_QUEUE,
        }
    }
}
