use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use downlink_frame::{DecoderStats, FrameConfig, FrameDecoder, FrameError, FramePoll};
use downlink_schema::{DecodedPacket, Schema, SchemaError};
use downlink_transport::{ByteSource, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the decode loop stopped.
#[derive(Debug)]
pub enum DecoderExit {
    /// The byte source reached its end or was closed.
    SourceClosed,
    /// Shutdown was requested.
    Shutdown,
    /// The packet consumer went away.
    ConsumerStopped,
    /// The byte source failed.
    Failed(FrameError),
}

/// Summary of a finished decode loop.
#[derive(Debug)]
pub struct DecoderReport {
    pub exit: DecoderExit,
    pub stats: DecoderStats,
    /// Packets unpacked and handed on.
    pub packets: u64,
    /// Verified frames the schema could not unpack.
    pub schema_errors: u64,
}

/// Raise `config.max_payload_size` so every variant in `schema` fits.
///
/// A limit below the schema's largest payload would drop each of those
/// frames as oversize.
pub fn fit_frame_config(schema: &Schema, mut config: FrameConfig) -> FrameConfig {
    let largest = schema.max_payload_len();
    if config.max_payload_size < largest {
        debug!(
            from = config.max_payload_size,
            to = largest,
            "raising payload limit to fit schema"
        );
        config.max_payload_size = largest;
    }
    config
}

/// Run the decode loop on the calling thread.
///
/// Each verified frame is unpacked against `schema` and passed to
/// `deliver`; returning `false` from `deliver` stops the loop. Frames the
/// schema rejects are logged and skipped. The loop checks `shutdown`
/// between reads, so it stops within one read timeout of cancellation.
pub fn run_decoder<S, F>(
    decoder: &mut FrameDecoder<S>,
    schema: &Schema,
    shutdown: &CancellationToken,
    mut deliver: F,
) -> DecoderReport
where
    S: ByteSource,
    F: FnMut(DecodedPacket) -> bool,
{
    let mut packets = 0u64;
    let mut schema_errors = 0u64;

    let limit = decoder.config().max_payload_size;
    if limit < schema.max_payload_len() {
        error!(
            limit,
            largest = schema.max_payload_len(),
            "payload limit is below the schema's largest variant, those frames will be dropped"
        );
    }

    let exit = loop {
        if shutdown.is_cancelled() {
            break DecoderExit::Shutdown;
        }

        let frame = match decoder.poll_frame() {
            Ok(FramePoll::Frame(frame)) => frame,
            Ok(FramePoll::Incomplete | FramePoll::Dropped(_)) => continue,
            Err(FrameError::Source(TransportError::Closed) | FrameError::ConnectionClosed) => {
                break DecoderExit::SourceClosed;
            }
            Err(err) => break DecoderExit::Failed(err),
        };

        match schema.unpack(frame.variant, &frame.payload) {
            Ok(packet) => {
                packets += 1;
                debug!(variant = %packet.variant_char(), fields = packet.fields.len(), "packet decoded");
                if !deliver(packet) {
                    break DecoderExit::ConsumerStopped;
                }
            }
            Err(err @ SchemaError::UnknownVariant(_)) => {
                schema_errors += 1;
                warn!(error = %err, "dropping packet");
            }
            Err(err) => {
                schema_errors += 1;
                error!(error = %err, "schema does not match firmware, dropping packet");
            }
        }
    };

    let stats = decoder.stats();
    info!(
        ?exit,
        frames = stats.frames,
        sync_errors = stats.sync_errors,
        integrity_errors = stats.integrity_errors,
        packets,
        schema_errors,
        "decoder stopped"
    );

    DecoderReport {
        exit,
        stats,
        packets,
        schema_errors,
    }
}

/// Run the decode loop on a dedicated OS thread, feeding `packets`.
///
/// A full queue blocks this thread, which in turn leaves bytes in the
/// source's buffer.
pub fn spawn_decoder<S>(
    mut decoder: FrameDecoder<S>,
    schema: Arc<Schema>,
    packets: mpsc::Sender<DecodedPacket>,
    shutdown: CancellationToken,
) -> io::Result<JoinHandle<DecoderReport>>
where
    S: ByteSource + Send + 'static,
{
    std::thread::Builder::new()
        .name("downlink-decode".to_string())
        .spawn(move || {
            run_decoder(&mut decoder, &schema, &shutdown, |packet| {
                packets.blocking_send(packet).is_ok()
            })
        })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use downlink_frame::encode_frame;
    use downlink_transport::MemorySource;

    use super::*;

    const SCHEMA: &str = r#"{
        "Fields": {"Temp": {"type": "int16"}},
        "Output_Order_A": ["Temp"]
    }"#;

    fn wire(frames: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (variant, payload) in frames {
            encode_frame(*variant, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn skips_schema_errors_and_stops_at_end() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let bytes = wire(&[
            (b'A', 7i16.to_le_bytes().to_vec()),
            (b'Z', vec![1, 2]),
            (b'A', vec![1, 2, 3]),
            (b'A', (-3i16).to_le_bytes().to_vec()),
        ]);
        let mut decoder = FrameDecoder::new(MemorySource::from_bytes(&bytes));

        let mut seen = Vec::new();
        let report = run_decoder(&mut decoder, &schema, &CancellationToken::new(), |p| {
            seen.push(p);
            true
        });

        assert!(matches!(report.exit, DecoderExit::SourceClosed));
        assert_eq!(report.packets, 2);
        assert_eq!(report.schema_errors, 2);
        assert_eq!(report.stats.frames, 4);
        assert_eq!(seen.len(), 2);
    }

    fn wide_schema(floats: usize) -> Schema {
        let names: Vec<String> = (0..floats).map(|i| format!("F{i}")).collect();
        let fields: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .map(|name| (name.clone(), serde_json::json!({"type": "float32"})))
            .collect();
        let document = serde_json::json!({"Fields": fields, "Output_Order_A": names});
        Schema::from_json_str(&document.to_string()).unwrap()
    }

    #[test]
    fn fitted_config_accepts_payloads_over_default_limit() {
        let schema = wide_schema(300);
        assert_eq!(schema.max_payload_len(), 1200);
        let bytes = wire(&[(b'A', vec![0; 1200])]);

        let mut narrow = FrameDecoder::new(MemorySource::from_bytes(&bytes));
        let report = run_decoder(&mut narrow, &schema, &CancellationToken::new(), |_| true);
        assert_eq!(report.packets, 0);
        assert_eq!(report.stats.oversize, 1);

        let config = fit_frame_config(&schema, FrameConfig::default());
        assert_eq!(config.max_payload_size, 1200);
        let mut fitted = FrameDecoder::with_config(MemorySource::from_bytes(&bytes), config);
        let report = run_decoder(&mut fitted, &schema, &CancellationToken::new(), |_| true);
        assert_eq!(report.packets, 1);
        assert_eq!(report.stats.oversize, 0);
    }

    #[test]
    fn fitting_never_lowers_the_limit() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let config = fit_frame_config(&schema, FrameConfig::default());
        assert_eq!(config.max_payload_size, downlink_frame::DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn consumer_can_stop_the_loop() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let bytes = wire(&[(b'A', vec![0, 0]), (b'A', vec![1, 0])]);
        let mut decoder = FrameDecoder::new(MemorySource::from_bytes(&bytes));

        let report = run_decoder(&mut decoder, &schema, &CancellationToken::new(), |_| false);
        assert!(matches!(report.exit, DecoderExit::ConsumerStopped));
        assert_eq!(report.packets, 1);
    }

    #[test]
    fn cancelled_before_start() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let (source, _feed) = MemorySource::new(std::time::Duration::from_millis(10));
        let mut decoder = FrameDecoder::new(source);
        let token = CancellationToken::new();
        token.cancel();

        let report = run_decoder(&mut decoder, &schema, &token, |_| true);
        assert!(matches!(report.exit, DecoderExit::Shutdown));
    }

    #[test]
    fn thread_feeds_channel() {
        let schema = Arc::new(Schema::from_json_str(SCHEMA).unwrap());
        let bytes = wire(&[(b'A', 5i16.to_le_bytes().to_vec())]);
        let (tx, mut rx) = mpsc::channel(4);

        let handle = spawn_decoder(
            FrameDecoder::new(MemorySource::from_bytes(&bytes)),
            schema,
            tx,
            CancellationToken::new(),
        )
        .unwrap();
        let report = handle.join().unwrap();

        assert_eq!(report.packets, 1);
        let packet = rx.try_recv().unwrap();
        assert_eq!(packet.variant, b'A');
    }
}
