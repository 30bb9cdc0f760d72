use downlink_schema::DecodedPacket;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator::Aggregator;
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::hub::{BroadcastHub, Subscription};
use crate::message::{encode, Message, Payload, StateView};
use crate::sink::{SinkHandle, SinkRecord};

/// Depth of the command queue shared by HTTP handlers.
const COMMAND_QUEUE: usize = 64;

/// Requests served on the aggregation task.
#[derive(Debug)]
pub enum Command {
    /// Join the broadcast; the subscription starts with a full `data` message.
    Subscribe(oneshot::Sender<Subscription>),
    /// Current `{metric, historic}` as JSON.
    Query(oneshot::Sender<Payload>),
    Stats(oneshot::Sender<ServiceStats>),
}

/// Counters kept by the aggregation task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub packets_applied: u64,
    pub packets_rejected: u64,
    pub updates_published: u64,
    pub subscribers: usize,
}

/// The single task that owns the aggregate state.
///
/// Packets are applied strictly in arrival order. Subscribe and query
/// requests are served between packets, so every reader sees a state that
/// some whole number of packets produced.
#[derive(Debug)]
pub struct TelemetryService {
    packets: mpsc::Receiver<DecodedPacket>,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    state: ServiceState,
}

#[derive(Debug)]
struct ServiceState {
    aggregator: Aggregator,
    hub: BroadcastHub,
    sink: Option<SinkHandle>,
    stats: ServiceStats,
}

/// Cloneable access to a running [`TelemetryService`].
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    packets: mpsc::Sender<DecodedPacket>,
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl TelemetryService {
    pub fn new(config: HubConfig, shutdown: CancellationToken) -> (Self, ServiceHandle) {
        let (packet_tx, packet_rx) = mpsc::channel(config.packet_queue.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        let service = Self {
            packets: packet_rx,
            commands: command_rx,
            shutdown: shutdown.clone(),
            state: ServiceState {
                aggregator: Aggregator::new(config.history_capacity),
                hub: BroadcastHub::new(config.subscriber_buffer),
                sink: None,
                stats: ServiceStats::default(),
            },
        };
        let handle = ServiceHandle {
            packets: packet_tx,
            commands: command_tx,
            shutdown,
        };
        (service, handle)
    }

    /// Persist every applied cycle through `sink`.
    pub fn with_sink(mut self, sink: SinkHandle) -> Self {
        self.state.sink = Some(sink);
        self
    }

    /// Process packets and commands until shutdown, or until both queues
    /// are closed. Packets still queued at shutdown are dropped.
    pub async fn run(self) -> ServiceStats {
        let Self {
            mut packets,
            mut commands,
            shutdown,
            mut state,
        } = self;
        let mut packets_open = true;
        let mut commands_open = true;

        info!("telemetry service started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => state.handle_command(command),
                    None => commands_open = false,
                },
                packet = packets.recv(), if packets_open => match packet {
                    Some(packet) => state.handle_packet(&packet),
                    None => {
                        debug!("packet queue closed");
                        packets_open = false;
                    }
                },
                else => break,
            }
        }

        if let Some(sink) = state.sink.take() {
            let report = sink.close();
            info!(written = report.written, dropped = report.dropped, "sink closed");
        }
        state.stats.subscribers = state.hub.subscriber_count();
        info!(
            applied = state.stats.packets_applied,
            rejected = state.stats.packets_rejected,
            "telemetry service stopped"
        );
        state.stats
    }
}

impl ServiceState {
    fn handle_packet(&mut self, packet: &DecodedPacket) {
        let update = match self.aggregator.apply(packet) {
            Ok(update) => update,
            Err(err) => {
                self.stats.packets_rejected += 1;
                error!(error = %err, "packet rejected, keeping previous snapshot");
                return;
            }
        };
        self.stats.packets_applied += 1;

        let message = Message::Update {
            metric: self.aggregator.snapshot(),
            historic: &update.historic,
        };
        match encode(&message) {
            Ok(payload) => {
                let report = self.hub.publish(&payload);
                self.stats.updates_published += 1;
                debug!(
                    variant = %char::from(update.variant),
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "update published"
                );
            }
            Err(err) => error!(error = %err, "failed to serialize update"),
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.submit(SinkRecord {
                variant: update.variant,
                timestamp: update.timestamp,
                row: update.row,
            });
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe(reply) => {
                let initial = Message::Data {
                    metric: self.aggregator.snapshot(),
                    historic: self.aggregator.history(),
                };
                match encode(&initial) {
                    Ok(payload) => {
                        let subscription = self.hub.subscribe(payload);
                        if let Err(subscription) = reply.send(subscription) {
                            self.hub.unsubscribe(subscription.id());
                        }
                    }
                    Err(err) => error!(error = %err, "failed to serialize initial state"),
                }
            }
            Command::Query(reply) => {
                let view = StateView {
                    metric: self.aggregator.snapshot(),
                    historic: self.aggregator.history(),
                };
                match encode(&view) {
                    Ok(payload) => {
                        let _ = reply.send(payload);
                    }
                    Err(err) => error!(error = %err, "failed to serialize state"),
                }
            }
            Command::Stats(reply) => {
                let mut stats = self.stats;
                stats.subscribers = self.hub.subscriber_count();
                let _ = reply.send(stats);
            }
        }
    }
}

impl ServiceHandle {
    /// Sender for decoded packets, typically moved into the decode thread.
    pub fn packet_sender(&self) -> mpsc::Sender<DecodedPacket> {
        self.packets.clone()
    }

    pub async fn subscribe(&self) -> Result<Subscription> {
        self.request(Command::Subscribe).await
    }

    pub async fn query(&self) -> Result<Payload> {
        self.request(Command::Query).await
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        self.request(Command::Stats).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| HubError::ServiceStopped)?;
        rx.await.map_err(|_| HubError::ServiceStopped)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::aggregator::tests::{battery_packet, motor_packet};

    fn start() -> (ServiceHandle, tokio::task::JoinHandle<ServiceStats>) {
        let (service, handle) = TelemetryService::new(HubConfig::default(), CancellationToken::new());
        (handle, tokio::spawn(service.run()))
    }

    async fn next_json(sub: &mut Subscription) -> Value {
        let payload = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("message within timeout")
            .expect("subscription open");
        serde_json::from_str(&payload).expect("valid json")
    }

    #[tokio::test]
    async fn subscriber_gets_data_then_updates() {
        let (handle, task) = start();
        let mut sub = handle.subscribe().await.unwrap();

        let initial = next_json(&mut sub).await;
        assert_eq!(initial["type"], "data");
        assert_eq!(initial["historic"]["Battery"], serde_json::json!([]));

        handle.packet_sender().send(battery_packet(88.0)).await.unwrap();
        let update = next_json(&mut sub).await;
        assert_eq!(update["type"], "update");
        assert_eq!(update["metric"]["SOC_Ah"], 88.0);
        assert_eq!(update["historic"]["Battery"], 88.0);

        handle.shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.packets_applied, 1);
    }

    #[tokio::test]
    async fn query_reflects_applied_packets() {
        let (handle, task) = start();
        let tx = handle.packet_sender();
        tx.send(motor_packet(1.0, 2.0)).await.unwrap();
        tx.send(battery_packet(50.0)).await.unwrap();

        // Stats are served between packets; wait until both landed.
        while handle.stats().await.unwrap().packets_applied < 2 {
            tokio::task::yield_now().await;
        }

        let body: Value = serde_json::from_str(&handle.query().await.unwrap()).unwrap();
        assert_eq!(body["metric"]["Bus_Power"], 800.0);
        assert_eq!(body["historic"]["Speed"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["historic"]["Pack_Voltage"].as_array().map(Vec::len), Some(1));
        assert!(body.get("type").is_none());

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_packet_keeps_snapshot() {
        let (handle, task) = start();
        let tx = handle.packet_sender();
        tx.send(battery_packet(40.0)).await.unwrap();
        let mut broken = battery_packet(1.0);
        broken.fields = broken
            .fields
            .iter()
            .filter(|(name, _)| *name != "Pack_Voltage")
            .collect();
        tx.send(broken).await.unwrap();

        let stats = loop {
            let stats = handle.stats().await.unwrap();
            if stats.packets_applied + stats.packets_rejected == 2 {
                break stats;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(stats.packets_rejected, 1);

        let body: Value = serde_json::from_str(&handle.query().await.unwrap()).unwrap();
        assert_eq!(body["metric"]["SOC_Ah"], 40.0);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_gap_and_no_duplicate() {
        let (handle, task) = start();
        let tx = handle.packet_sender();
        for soc in 0..5 {
            tx.send(battery_packet(f64::from(soc))).await.unwrap();
        }
        let mut sub = handle.subscribe().await.unwrap();
        for soc in 5..10 {
            tx.send(battery_packet(f64::from(soc))).await.unwrap();
        }

        let initial = next_json(&mut sub).await;
        let mut seen: Vec<f64> = initial["historic"]["Battery"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        while seen.len() < 10 {
            let update = next_json(&mut sub).await;
            seen.push(update["historic"]["Battery"].as_f64().unwrap());
        }

        let expected: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(seen, expected);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let (handle, task) = start();
        let sub = handle.subscribe().await.unwrap();
        assert_eq!(handle.stats().await.unwrap().subscribers, 1);
        drop(sub);

        handle.packet_sender().send(battery_packet(1.0)).await.unwrap();
        while handle.stats().await.unwrap().packets_applied < 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle.stats().await.unwrap().subscribers, 0);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn requests_fail_after_shutdown() {
        let (handle, task) = start();
        handle.shutdown();
        task.await.unwrap();
        assert!(matches!(handle.query().await, Err(HubError::ServiceStopped)));
    }
}
