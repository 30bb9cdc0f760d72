use std::sync::Arc;

use downlink_frame::FrameDecoder;
use downlink_hub::{
    open_sink, spawn_decoder, spawn_sink, DecoderExit, DecoderReport, TelemetryService,
    DEFAULT_SINK_QUEUE,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cmd::{load_schema, open_source, ServeArgs};
use crate::exit::{frame_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::http::build_router;

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("downlink-rt")
        .build()
        .map_err(|err| io_error("runtime start failed", err))?;
    runtime.block_on(serve(args))
}

async fn serve(args: ServeArgs) -> CliResult<i32> {
    let schema = Arc::new(load_schema(args.source.schema.as_deref())?);
    let frame_config = args.source.frame_config(&schema)?;
    let source = open_source(&args.source)?;
    let shutdown = CancellationToken::new();

    let (mut service, handle) = TelemetryService::new(args.hub_config(), shutdown.clone());
    if let Some(dir) = &args.log_dir {
        let sink = open_sink(args.sink.into(), dir)
            .and_then(|sink| spawn_sink(sink, DEFAULT_SINK_QUEUE))
            .map_err(|err| io_error(&format!("failed opening sink in {}", dir.display()), err))?;
        info!(dir = %dir.display(), format = ?args.sink, "persisting aggregation cycles");
        service = service.with_sink(sink);
    }
    let service_task = tokio::spawn(service.run());

    let decoder = spawn_decoder(
        FrameDecoder::with_config(source, frame_config),
        schema,
        handle.packet_sender(),
        shutdown.clone(),
    )
    .map_err(|err| io_error("decode thread start failed", err))?;

    // A failed source ends the whole process; a finished replay keeps serving.
    let decode_task = {
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || {
            let report = decoder.join();
            if !matches!(
                report,
                Ok(DecoderReport {
                    exit: DecoderExit::SourceClosed | DecoderExit::Shutdown,
                    ..
                })
            ) {
                shutdown.cancel();
            }
            report
        })
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(err) => warn!(error = %err, "signal handler unavailable"),
            }
            shutdown.cancel();
        });
    }

    let listener = match TcpListener::bind(args.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            shutdown.cancel();
            return Err(io_error(&format!("bind {} failed", args.bind), err));
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "serving telemetry"),
        Err(err) => warn!(error = %err, "bound address unavailable"),
    }

    let served = axum::serve(listener, build_router(handle.clone()))
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await;
    shutdown.cancel();

    let stats = service_task
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("aggregation task failed: {err}")))?;
    info!(
        applied = stats.packets_applied,
        rejected = stats.packets_rejected,
        published = stats.updates_published,
        "aggregation stopped"
    );

    let report = decode_task
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("decode task failed: {err}")))?
        .map_err(|_| CliError::new(INTERNAL, "decode thread panicked"))?;

    served.map_err(|err| io_error("http server failed", err))?;

    match report.exit {
        DecoderExit::Failed(err) => {
            error!(error = %err, "byte source failed");
            Err(frame_error("decode failed", err))
        }
        _ => Ok(SUCCESS),
    }
}
