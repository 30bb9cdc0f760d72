use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use downlink_frame::{FrameConfig, ResyncPolicy, DEFAULT_MAX_PAYLOAD};
use downlink_hub::{
    fit_frame_config, HubConfig, SinkFormat, DEFAULT_HISTORY_CAPACITY, DEFAULT_PACKET_QUEUE,
    DEFAULT_SUBSCRIBER_BUFFER,
};
use downlink_schema::Schema;
use downlink_transport::{ByteSource, ReaderSource, SourceConfig, DEFAULT_BAUD_RATE};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::exit::{io_error, schema_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod schema;
pub mod serve;
pub mod simulate;
pub mod version;

/// Boxed source so serial and replay inputs share one decode path.
pub type DynSource = Box<dyn ByteSource + Send>;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode, aggregate and serve live telemetry over HTTP and WebSocket.
    Serve(ServeArgs),
    /// Print decoded packets as they arrive.
    Decode(DecodeArgs),
    /// Write synthetic frames to a file or serial device.
    Simulate(SimulateArgs),
    /// Print the decode table of a packet schema.
    Schema(SchemaArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Decode(args) => decode::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Schema(args) => schema::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct SourceSelect {
    /// Serial device the radio is attached to.
    pub port: Option<PathBuf>,
    /// Read a captured byte stream instead of a serial port.
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    #[command(flatten)]
    pub select: SourceSelect,
    /// Serial line rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Longest wait for a single read (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub read_timeout: String,
    /// Recovery after sync loss or a CRC mismatch.
    #[arg(long, value_enum, default_value = "scan")]
    pub resync: Resync,
    /// Largest payload length accepted before it counts as sync loss.
    /// Default: 1024, raised to fit the schema's largest variant.
    #[arg(long, value_name = "BYTES")]
    pub max_payload: Option<usize>,
    /// Packet schema file. Default: the bundled schema.
    #[arg(long, value_name = "PATH")]
    pub schema: Option<PathBuf>,
}

impl SourceArgs {
    /// Frame settings for `schema`. An explicit `--max-payload` smaller than
    /// the schema's largest variant is a usage error.
    pub fn frame_config(&self, schema: &Schema) -> CliResult<FrameConfig> {
        let config = FrameConfig {
            max_payload_size: self.max_payload.unwrap_or(DEFAULT_MAX_PAYLOAD),
            resync: self.resync.into(),
        };
        match self.max_payload {
            Some(limit) if limit < schema.max_payload_len() => Err(CliError::usage(format!(
                "--max-payload {limit} is smaller than the schema's largest payload ({} bytes)",
                schema.max_payload_len()
            ))),
            Some(_) => Ok(config),
            None => Ok(fit_frame_config(schema, config)),
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Resync {
    Scan,
    Flush,
}

impl From<Resync> for ResyncPolicy {
    fn from(value: Resync) -> Self {
        match value {
            Resync::Scan => ResyncPolicy::Scan,
            Resync::Flush => ResyncPolicy::Flush,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SinkKind {
    Csv,
    Jsonl,
}

impl From<SinkKind> for SinkFormat {
    fn from(value: SinkKind) -> Self {
        match value {
            SinkKind::Csv => SinkFormat::Csv,
            SinkKind::Jsonl => SinkFormat::Jsonl,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Address for the HTTP query and WebSocket endpoints.
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,
    /// Samples kept per history series.
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    pub history: usize,
    /// Decoded packets buffered between the decode thread and aggregation.
    #[arg(long, default_value_t = DEFAULT_PACKET_QUEUE)]
    pub queue: usize,
    /// Messages buffered per subscriber before it is dropped as lagging.
    #[arg(long, default_value_t = DEFAULT_SUBSCRIBER_BUFFER)]
    pub subscriber_buffer: usize,
    /// Append every aggregation cycle to files in this directory.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
    /// File format used with --log-dir.
    #[arg(long, value_enum, default_value = "csv")]
    pub sink: SinkKind,
}

impl ServeArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            history_capacity: self.history,
            subscriber_buffer: self.subscriber_buffer,
            packet_queue: self.queue,
        }
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Exit after printing N packets.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// File or serial device to write frames to.
    pub output: PathBuf,
    /// Only emit this packet variant. Default: every variant in turn.
    #[arg(long)]
    pub variant: Option<char>,
    /// Number of frames to write.
    #[arg(long, default_value_t = 100)]
    pub count: u64,
    /// Pause between frames (e.g. 100ms).
    #[arg(long)]
    pub interval: Option<String>,
    /// Flip one payload bit in every Kth frame.
    #[arg(long, value_name = "K")]
    pub corrupt_every: Option<u64>,
    /// Line rate when the output is a serial device.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Packet schema file. Default: the bundled schema.
    #[arg(long, value_name = "PATH")]
    pub schema: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Packet schema file. Default: the bundled schema.
    #[arg(long, value_name = "PATH")]
    pub schema: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn load_schema(path: Option<&Path>) -> CliResult<Schema> {
    match path {
        Some(path) => Schema::from_path(path)
            .map_err(|err| schema_error(&format!("failed loading {}", path.display()), err)),
        None => Schema::bundled().map_err(|err| schema_error("bundled schema", err)),
    }
}

pub fn open_source(args: &SourceArgs) -> CliResult<DynSource> {
    let read_timeout = parse_duration(&args.read_timeout)?;

    if let Some(path) = &args.select.replay {
        let file = File::open(path)
            .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
        info!(path = %path.display(), "replaying capture");
        return Ok(Box::new(ReaderSource::new(file)));
    }

    let Some(port) = &args.select.port else {
        return Err(CliError::usage("a serial port or --replay FILE is required"));
    };
    open_serial(
        port,
        SourceConfig {
            baud_rate: args.baud,
            read_timeout,
        },
    )
}

#[cfg(unix)]
fn open_serial(path: &Path, config: SourceConfig) -> CliResult<DynSource> {
    let port = downlink_transport::SerialPort::open(path, &config)
        .map_err(|err| crate::exit::transport_error("open failed", err))?;
    Ok(Box::new(port))
}

#[cfg(not(unix))]
fn open_serial(path: &Path, _config: SourceConfig) -> CliResult<DynSource> {
    Err(CliError::usage(format!(
        "serial ports are not supported on this platform ({})",
        path.display()
    )))
}

/// Cancel `shutdown` on SIGINT. Used by the synchronous commands.
pub fn install_ctrlc_handler(shutdown: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || shutdown.cancel())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_forms() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_durations() {
        for input in ["", "0s", "fast", "-1s", "1.5s"] {
            let err = parse_duration(input).unwrap_err();
            assert_eq!(err.code, USAGE, "{input:?}");
        }
    }

    #[test]
    fn resync_maps_to_policy() {
        assert_eq!(ResyncPolicy::from(Resync::Flush), ResyncPolicy::Flush);
        assert_eq!(ResyncPolicy::from(Resync::Scan), ResyncPolicy::Scan);
    }

    #[test]
    fn missing_replay_file_is_reported() {
        let args = SourceArgs {
            select: SourceSelect {
                port: None,
                replay: Some(PathBuf::from("/nonexistent/capture.bin")),
            },
            baud: DEFAULT_BAUD_RATE,
            read_timeout: "1s".to_string(),
            resync: Resync::Scan,
            max_payload: None,
            schema: None,
        };
        let err = open_source(&args).err().expect("open should fail");
        assert!(err.message.contains("/nonexistent/capture.bin"));
    }

    fn replay_args(max_payload: Option<usize>) -> SourceArgs {
        SourceArgs {
            select: SourceSelect {
                port: None,
                replay: Some(PathBuf::from("capture.bin")),
            },
            baud: DEFAULT_BAUD_RATE,
            read_timeout: "1s".to_string(),
            resync: Resync::Flush,
            max_payload,
            schema: None,
        }
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
    fn payload_limit_grows_to_fit_schema() {
        let config = replay_args(None).frame_config(&wide_schema(300)).unwrap();
        assert_eq!(config.max_payload_size, 1200);
        assert_eq!(config.resync, ResyncPolicy::Flush);

        let bundled = Schema::bundled().unwrap();
        let config = replay_args(None).frame_config(&bundled).unwrap();
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn explicit_payload_limit_below_schema_is_rejected() {
        let schema = wide_schema(300);
        let err = replay_args(Some(1024)).frame_config(&schema).unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("1200"));

        let config = replay_args(Some(4096)).frame_config(&schema).unwrap();
        assert_eq!(config.max_payload_size, 4096);
    }
}
