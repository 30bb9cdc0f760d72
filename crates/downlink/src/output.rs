use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use downlink_hub::{DecoderExit, DecoderReport};
use downlink_schema::{DecodedPacket, Fields, Schema, Slot};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    variant: char,
    fields: &'a Fields,
}

pub fn print_packet(packet: &DecodedPacket, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                kind: "packet",
                variant: packet.variant_char(),
                fields: &packet.fields,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    format!("VARIANT {}", packet.variant_char()),
                    "VALUE".to_string(),
                ]);
            for (name, value) in packet.fields.iter() {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let fields: Vec<String> = packet
                .fields
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("variant={} {}", packet.variant_char(), fields.join(" "));
        }
    }
}

#[derive(Serialize)]
struct StatsOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    exit: &'static str,
    frames: u64,
    packets: u64,
    schema_errors: u64,
    sync_errors: u64,
    oversize: u64,
    integrity_errors: u64,
    incomplete: u64,
    bytes_discarded: u64,
}

impl StatsOutput {
    fn rows(&self) -> [(&'static str, String); 9] {
        [
            ("exit", self.exit.to_string()),
            ("frames", self.frames.to_string()),
            ("packets", self.packets.to_string()),
            ("schema_errors", self.schema_errors.to_string()),
            ("sync_errors", self.sync_errors.to_string()),
            ("oversize", self.oversize.to_string()),
            ("integrity_errors", self.integrity_errors.to_string()),
            ("incomplete", self.incomplete.to_string()),
            ("bytes_discarded", self.bytes_discarded.to_string()),
        ]
    }
}

fn exit_name(exit: &DecoderExit) -> &'static str {
    match exit {
        DecoderExit::SourceClosed => "source-closed",
        DecoderExit::Shutdown => "shutdown",
        DecoderExit::ConsumerStopped => "count-reached",
        DecoderExit::Failed(_) => "failed",
    }
}

pub fn print_decoder_report(report: &DecoderReport, format: OutputFormat) {
    let out = StatsOutput {
        kind: "stats",
        exit: exit_name(&report.exit),
        frames: report.stats.frames,
        packets: report.packets,
        schema_errors: report.schema_errors,
        sync_errors: report.stats.sync_errors,
        oversize: report.stats.oversize,
        integrity_errors: report.stats.integrity_errors,
        incomplete: report.stats.incomplete,
        bytes_discarded: report.stats.bytes_discarded,
    };

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in out.rows() {
                table.add_row(vec![name.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = out
                .rows()
                .into_iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

#[derive(Serialize)]
struct SlotOutput<'a> {
    offset: usize,
    key: &'a str,
    wire: String,
    width: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    scale: Option<f64>,
}

#[derive(Serialize)]
struct LayoutOutput<'a> {
    variant: char,
    payload_len: usize,
    slots: Vec<SlotOutput<'a>>,
}

pub fn print_schema(schema: &Schema, format: OutputFormat) {
    let layouts: Vec<LayoutOutput<'_>> = schema
        .variants()
        .filter_map(|variant| schema.layout(variant))
        .map(|layout| LayoutOutput {
            variant: char::from(layout.variant()),
            payload_len: layout.payload_len(),
            slots: layout
                .entries()
                .map(|(offset, slot)| SlotOutput {
                    offset,
                    key: slot.key(),
                    wire: slot.wire().to_string(),
                    width: slot.width(),
                    scale: match slot {
                        Slot::Scalar { scale, .. } => *scale,
                        Slot::Flags { .. } => None,
                    },
                })
                .collect(),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&layouts).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            for layout in &layouts {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["OFFSET", "KEY", "TYPE", "WIDTH", "SCALE"]);
                for slot in &layout.slots {
                    table.add_row(vec![
                        slot.offset.to_string(),
                        slot.key.to_string(),
                        slot.wire.clone(),
                        slot.width.to_string(),
                        slot.scale.map(|s| s.to_string()).unwrap_or_default(),
                    ]);
                }
                println!(
                    "variant {} ({} bytes)\n{table}",
                    layout.variant, layout.payload_len
                );
            }
        }
        OutputFormat::Pretty => {
            for layout in &layouts {
                println!("variant {} payload_len={}", layout.variant, layout.payload_len);
                for slot in &layout.slots {
                    let scale = slot
                        .scale
                        .map(|s| format!(" x{s}"))
                        .unwrap_or_default();
                    println!(
                        "  {:>4}  {} {}[{}]{scale}",
                        slot.offset, slot.key, slot.wire, slot.width
                    );
                }
            }
        }
    }
}

#[derive(Serialize)]
pub struct SimulateSummary {
    pub frames: u64,
    pub corrupted: u64,
    pub bytes: u64,
    pub output: String,
}

pub fn print_simulate_summary(summary: &SimulateSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OUTPUT", "FRAMES", "CORRUPTED", "BYTES"])
                .add_row(vec![
                    summary.output.clone(),
                    summary.frames.to_string(),
                    summary.corrupted.to_string(),
                    summary.bytes.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "wrote {} frames ({} corrupted, {} bytes) to {}",
                summary.frames, summary.corrupted, summary.bytes, summary.output
            );
        }
    }
}
