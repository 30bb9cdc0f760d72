#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}

fn http_get(addr: SocketAddr, path: &str) -> Option<(String, String)> {
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_millis(200)).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )
    .ok()?;
    let mut response = String::new();
    stream.read_to_string(&mut response).ok()?;
    let (head, body) = response.split_once("\r\n\r\n")?;
    Some((head.to_string(), body.to_string()))
}

fn wait_for_packets(addr: SocketAddr, expected: u64, timeout: Duration) -> Value {
    let start = Instant::now();
    loop {
        if let Some((head, body)) = http_get(addr, "/health") {
            assert!(head.starts_with("HTTP/1.1 200"), "{head}");
            let health: Value = serde_json::from_str(&body).expect("health json");
            if health["packets_applied"] == expected {
                return health;
            }
        }
        if start.elapsed() >= timeout {
            panic!("server did not apply {expected} packets in time");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn serve_replays_capture_and_answers_queries() {
    let dir = tempfile::tempdir().expect("temp dir");
    let capture = dir.path().join("capture.bin");
    let logs = dir.path().join("logs");

    let status = Command::new(env!("CARGO_BIN_EXE_downlink"))
        .args(["--log-level", "error", "--format", "json", "simulate"])
        .arg(&capture)
        .args(["--count", "12", "--corrupt-every", "4"])
        .stdout(Stdio::null())
        .status()
        .expect("simulate should run");
    assert!(status.success());

    let addr = free_addr();
    let _server = Server(
        Command::new(env!("CARGO_BIN_EXE_downlink"))
            .args(["--log-level", "error", "serve", "--replay"])
            .arg(&capture)
            .arg("--bind")
            .arg(addr.to_string())
            .arg("--log-dir")
            .arg(&logs)
            .args(["--history", "4"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve should start"),
    );

    let health = wait_for_packets(addr, 9, Duration::from_secs(10));
    assert_eq!(health["packets_rejected"], 0);

    let (head, body) = http_get(addr, "/api/data/historical").expect("query should answer");
    assert!(head.to_ascii_lowercase().contains("content-type: application/json"));
    let state: Value = serde_json::from_str(&body).expect("state json");

    // Six A packets and three B packets survive; history keeps four per series.
    let speed = state["historic"]["Speed"].as_array().expect("speed series");
    assert_eq!(speed.len(), 4);
    let battery = state["historic"]["Battery"].as_array().expect("battery series");
    assert_eq!(battery.len(), 3);
    assert!(state["metric"]["Pack_Voltage"].is_number());
    assert_eq!(state["metric"]["cmus"].as_array().map(Vec::len), Some(5));

    // Rows reach disk on the sink thread, shortly after they are applied.
    let csv_path = logs.join("output_data_B.csv");
    let start = Instant::now();
    let csv = loop {
        let csv = std::fs::read_to_string(&csv_path).unwrap_or_default();
        if csv.lines().count() == 4 || start.elapsed() >= Duration::from_secs(5) {
            break csv;
        }
        thread::sleep(Duration::from_millis(50));
    };
    assert!(csv.starts_with("Timestamp,Pack_Voltage,Pack_Current,"), "{csv}");
    assert_eq!(csv.lines().count(), 4);
}
