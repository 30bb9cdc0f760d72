//! Append-only persistence of aggregation cycles.
//!
//! Sinks run on their own thread behind a bounded queue. When the disk
//! falls behind, rows are dropped with a warning rather than stalling the
//! aggregation task.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use downlink_schema::Fields;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Column holding the host receive time of each row.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// One row handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub variant: u8,
    pub timestamp: OffsetDateTime,
    pub row: Fields,
}

/// Destination for persisted rows.
pub trait Sink: Send {
    fn write(&mut self, record: &SinkRecord) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Csv,
    Jsonl,
}

/// Create `dir` if needed and open a sink of the given format in it.
pub fn open_sink(format: SinkFormat, dir: &Path) -> io::Result<Box<dyn Sink>> {
    std::fs::create_dir_all(dir)?;
    Ok(match format {
        SinkFormat::Csv => Box::new(CsvSink::new(dir)),
        SinkFormat::Jsonl => Box::new(JsonlSink::new(dir)),
    })
}

/// One `output_data_<V>.csv` per variant.
///
/// The column set is fixed by the file's existing header, or by the first
/// row written to a new file. Later rows are mapped onto those columns;
/// missing values are written empty and unknown keys are ignored.
#[derive(Debug)]
pub struct CsvSink {
    dir: PathBuf,
    files: BTreeMap<u8, CsvFile>,
}

#[derive(Debug)]
struct CsvFile {
    header: Vec<String>,
    out: BufWriter<File>,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn path_for(&self, variant: u8) -> PathBuf {
        self.dir
            .join(format!("output_data_{}.csv", char::from(variant)))
    }

    fn open(&self, record: &SinkRecord) -> io::Result<CsvFile> {
        let path = self.path_for(record.variant);
        let existing = read_header(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut out = BufWriter::new(file);

        let header = match existing {
            Some(header) => header,
            None => {
                let header: Vec<String> = std::iter::once(TIMESTAMP_COLUMN)
                    .chain(record.row.keys())
                    .map(str::to_string)
                    .collect();
                write_csv_line(&mut out, header.iter().map(String::as_str))?;
                header
            }
        };
        info!(path = %path.display(), columns = header.len(), "csv sink opened");
        Ok(CsvFile { header, out })
    }
}

impl Sink for CsvSink {
    fn write(&mut self, record: &SinkRecord) -> io::Result<()> {
        if !self.files.contains_key(&record.variant) {
            let file = self.open(record)?;
            self.files.insert(record.variant, file);
        }
        let Some(file) = self.files.get_mut(&record.variant) else {
            return Ok(());
        };

        let timestamp = format_timestamp(record.timestamp);
        let cells: Vec<String> = file
            .header
            .iter()
            .map(|column| {
                if column == TIMESTAMP_COLUMN {
                    timestamp.clone()
                } else {
                    record.row.get(column).map(|v| v.to_string()).unwrap_or_default()
                }
            })
            .collect();
        write_csv_line(&mut file.out, cells.iter().map(String::as_str))
    }

    fn flush(&mut self) -> io::Result<()> {
        for file in self.files.values_mut() {
            file.out.flush()?;
        }
        Ok(())
    }
}

/// One `output_data_<V>.jsonl` per variant, one object per line.
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    files: BTreeMap<u8, BufWriter<File>>,
}

#[derive(Serialize)]
struct JsonRow<'a> {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(flatten)]
    fields: &'a Fields,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn path_for(&self, variant: u8) -> PathBuf {
        self.dir
            .join(format!("output_data_{}.jsonl", char::from(variant)))
    }
}

impl Sink for JsonlSink {
    fn write(&mut self, record: &SinkRecord) -> io::Result<()> {
        if !self.files.contains_key(&record.variant) {
            let path = self.path_for(record.variant);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!(path = %path.display(), "jsonl sink opened");
            self.files.insert(record.variant, BufWriter::new(file));
        }
        let Some(out) = self.files.get_mut(&record.variant) else {
            return Ok(());
        };

        let line = serde_json::to_string(&JsonRow {
            timestamp: format_timestamp(record.timestamp),
            fields: &record.row,
        })
        .map_err(io::Error::other)?;
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        for out in self.files.values_mut() {
            out.flush()?;
        }
        Ok(())
    }
}

/// Sending side of a sink thread.
#[derive(Debug)]
pub struct SinkHandle {
    tx: Option<SyncSender<SinkRecord>>,
    worker: Option<JoinHandle<u64>>,
    dropped: u64,
}

/// Totals reported when a sink is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub written: u64,
    pub dropped: u64,
}

/// Start a sink on a dedicated thread with a queue of `capacity` rows.
pub fn spawn_sink(sink: Box<dyn Sink>, capacity: usize) -> io::Result<SinkHandle> {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let worker = std::thread::Builder::new()
        .name("downlink-sink".to_string())
        .spawn(move || run_sink(sink, rx))?;
    Ok(SinkHandle {
        tx: Some(tx),
        worker: Some(worker),
        dropped: 0,
    })
}

impl SinkHandle {
    /// Queue a row without blocking. Returns false if it was dropped.
    pub fn submit(&mut self, record: SinkRecord) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, "sink queue full, dropping row");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                warn!("sink thread has stopped");
                self.tx = None;
                false
            }
        }
    }

    /// Flush queued rows and stop the sink thread.
    pub fn close(mut self) -> SinkReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SinkReport {
        self.tx = None;
        let written = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(written)) => written,
            Some(Err(_)) => {
                warn!("sink thread panicked");
                0
            }
            None => 0,
        };
        SinkReport {
            written,
            dropped: self.dropped,
        }
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

fn run_sink(mut sink: Box<dyn Sink>, rx: Receiver<SinkRecord>) -> u64 {
    let mut written = 0u64;
    while let Ok(first) = rx.recv() {
        let mut next = Some(first);
        while let Some(record) = next {
            match sink.write(&record) {
                Ok(()) => written += 1,
                Err(err) => warn!(error = %err, variant = %char::from(record.variant), "sink write failed"),
            }
            next = rx.try_recv().ok();
        }
        if let Err(err) = sink.flush() {
            warn!(error = %err, "sink flush failed");
        }
    }
    debug!(written, "sink thread exiting");
    written
}

fn read_header(path: &Path) -> io::Result<Option<Vec<String>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(parse_csv_line(line)))
}

fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp.format(&Rfc3339).unwrap_or_default()
}

fn write_csv_line<'a>(out: &mut impl Write, cells: impl Iterator<Item = &'a str>) -> io::Result<()> {
    let mut first = true;
    for cell in cells {
        if !first {
            out.write_all(b",")?;
        }
        first = false;
        if cell.contains([',', '"', '\n', '\r']) {
            out.write_all(b"\"")?;
            out.write_all(cell.replace('"', "\"\"").as_bytes())?;
            out.write_all(b"\"")?;
        } else {
            out.write_all(cell.as_bytes())?;
        }
    }
    out.write_all(b"\r\n")
}

/// Split one CSV record, honouring quoted cells.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if cell.is_empty() => quoted = true,
            (',', false) => cells.push(std::mem::take(&mut cell)),
            (other, _) => cell.push(other),
        }
    }
    cells.push(cell);
    cells
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn record(variant: u8, row: &[(&str, f64)]) -> SinkRecord {
        SinkRecord {
            variant,
            timestamp: datetime!(2025-06-01 09:30:00 UTC),
            row: row.iter().copied().collect(),
        }
    }

    #[test]
    fn csv_header_fixed_by_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());

        sink.write(&record(b'A', &[("Speed", 10.0), ("Bus_Power", 5.5)]))
            .unwrap();
        sink.write(&record(b'A', &[("Bus_Power", 6.0), ("Extra", 1.0)]))
            .unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(dir.path().join("output_data_A.csv")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Timestamp,Speed,Bus_Power");
        assert_eq!(lines[1], "2025-06-01T09:30:00Z,10,5.5");
        assert_eq!(lines[2], "2025-06-01T09:30:00Z,,6");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn csv_reuses_existing_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output_data_B.csv");
        std::fs::write(&path, "Pack_Voltage,Timestamp\r\n").unwrap();

        let mut sink = CsvSink::new(dir.path());
        sink.write(&record(b'B', &[("SOC_Ah", 1.0), ("Pack_Voltage", 96.5)]))
            .unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Pack_Voltage,Timestamp\r\n96.5,2025-06-01T09:30:00Z\r\n"
        );
    }

    #[test]
    fn csv_quoting_round_trips() {
        let mut out = Vec::new();
        write_csv_line(&mut out, ["plain", "a,b", "say \"hi\""].into_iter()).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(line, "plain,\"a,b\",\"say \"\"hi\"\"\"\r\n");
        assert_eq!(
            parse_csv_line(line.trim_end()),
            vec!["plain", "a,b", "say \"hi\""]
        );
    }

    #[test]
    fn jsonl_writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlSink::new(dir.path());
        sink.write(&record(b'A', &[("Speed", f64::INFINITY)])).unwrap();
        sink.write(&record(b'A', &[("Speed", 2.0)])).unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(dir.path().join("output_data_A.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["Speed"], "Infinity");
        assert_eq!(lines[1]["Timestamp"], "2025-06-01T09:30:00Z");
    }

    #[test]
    fn worker_drains_queue_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let sink = open_sink(SinkFormat::Csv, &dir.path().join("logs")).unwrap();
        let mut handle = spawn_sink(sink, 64).unwrap();
        for i in 0..10 {
            assert!(handle.submit(record(b'A', &[("n", f64::from(i))])));
        }
        let report = handle.close();
        assert_eq!(report, SinkReport { written: 10, dropped: 0 });

        let text =
            std::fs::read_to_string(dir.path().join("logs").join("output_data_A.csv")).unwrap();
        assert_eq!(text.lines().count(), 11);
    }
}
