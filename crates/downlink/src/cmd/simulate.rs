use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use downlink_frame::{FrameConfig, FrameWriter, HEADER_SIZE};
use downlink_hub::{fit_frame_config, synthetic_fields};
use downlink_schema::Schema;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cmd::{install_ctrlc_handler, load_schema, parse_duration, SimulateArgs};
use crate::exit::{frame_error, io_error, schema_error, CliError, CliResult, SUCCESS};
use crate::output::{print_simulate_summary, OutputFormat, SimulateSummary};

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let schema = load_schema(args.schema.as_deref())?;
    let variants = select_variants(&schema, args.variant)?;
    let interval = args.interval.as_deref().map(parse_duration).transpose()?;
    if args.corrupt_every == Some(0) {
        return Err(CliError::usage("--corrupt-every must be greater than zero"));
    }

    let config = fit_frame_config(&schema, FrameConfig::default());
    let mut writer = FrameWriter::with_config(open_output(&args.output, args.baud)?, config);
    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    let mut summary = SimulateSummary {
        frames: 0,
        corrupted: 0,
        bytes: 0,
        output: args.output.display().to_string(),
    };

    for tick in 0..args.count {
        if shutdown.is_cancelled() {
            info!(frames = summary.frames, "interrupted");
            break;
        }

        let variant = variants[(tick % variants.len() as u64) as usize];
        let payload = schema
            .pack(variant, &synthetic_fields(&schema, variant, tick))
            .map_err(|err| schema_error("pack failed", err))?;

        let corrupt = args.corrupt_every.is_some_and(|every| (tick + 1) % every == 0);
        let written = if corrupt {
            // Walk the damaged bit through the payload so different fields get hit.
            let bit = (tick as usize).wrapping_mul(13);
            writer.send_corrupted(variant, &payload, bit)
        } else {
            writer.send(variant, &payload)
        };
        written.map_err(|err| frame_error("write failed", err))?;

        summary.frames += 1;
        summary.corrupted += u64::from(corrupt);
        summary.bytes += (HEADER_SIZE + payload.len()) as u64;
        debug!(tick, variant = %char::from(variant), corrupt, "frame written");

        if let Some(interval) = interval {
            writer
                .flush()
                .map_err(|err| frame_error("flush failed", err))?;
            pause(interval, &shutdown);
        }
    }

    writer
        .flush()
        .map_err(|err| frame_error("flush failed", err))?;
    print_simulate_summary(&summary, format);
    Ok(SUCCESS)
}

fn select_variants(schema: &Schema, requested: Option<char>) -> CliResult<Vec<u8>> {
    match requested {
        Some(variant) => {
            let tag = u8::try_from(variant)
                .ok()
                .filter(|tag| schema.has_variant(*tag))
                .ok_or_else(|| {
                    CliError::usage(format!("schema has no packet variant {variant:?}"))
                })?;
            Ok(vec![tag])
        }
        None => {
            let all: Vec<u8> = schema.variants().collect();
            if all.is_empty() {
                return Err(CliError::usage("schema defines no packet variants"));
            }
            Ok(all)
        }
    }
}

/// Serial devices get raw line settings; anything else is created as a file.
fn open_output(path: &Path, baud: u32) -> CliResult<Box<dyn Write>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;

        let is_tty = std::fs::metadata(path)
            .map(|meta| meta.file_type().is_char_device())
            .unwrap_or(false);
        if is_tty {
            let config = downlink_transport::SourceConfig {
                baud_rate: baud,
                ..Default::default()
            };
            let port = downlink_transport::SerialPort::open(path, &config)
                .map_err(|err| crate::exit::transport_error("open failed", err))?;
            return Ok(Box::new(port));
        }
    }
    #[cfg(not(unix))]
    let _ = baud;

    let file = File::create(path)
        .map_err(|err| io_error(&format!("failed creating {}", path.display()), err))?;
    Ok(Box::new(file))
}

/// Sleep for `interval`, waking early on interrupt.
fn pause(interval: Duration, shutdown: &CancellationToken) {
    const SLICE: Duration = Duration::from_millis(50);
    let mut remaining = interval;
    while !remaining.is_zero() && !shutdown.is_cancelled() {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}
