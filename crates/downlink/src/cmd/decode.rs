use downlink_frame::FrameDecoder;
use downlink_hub::{run_decoder, DecoderExit};
use tokio_util::sync::CancellationToken;

use crate::cmd::{install_ctrlc_handler, load_schema, open_source, DecodeArgs};
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_decoder_report, print_packet, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let schema = load_schema(args.source.schema.as_deref())?;
    let frame_config = args.source.frame_config(&schema)?;
    let source = open_source(&args.source)?;
    let mut decoder = FrameDecoder::with_config(source, frame_config);

    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    let mut printed = 0u64;
    let report = run_decoder(&mut decoder, &schema, &shutdown, |packet| {
        print_packet(&packet, format);
        printed += 1;
        args.count.is_none_or(|count| printed < count)
    });

    print_decoder_report(&report, format);

    match report.exit {
        DecoderExit::Failed(err) => Err(frame_error("decode failed", err)),
        _ => Ok(SUCCESS),
    }
}
