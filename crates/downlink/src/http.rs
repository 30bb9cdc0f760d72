//! HTTP query and WebSocket subscription endpoints.
//!
//! - `GET /health`: aggregation counters
//! - `GET /api/data/historical`: full `{metric, historic}` state
//! - `GET /ws/updates`: one `data` message, then an `update` per packet

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use downlink_hub::ServiceHandle;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub service: ServiceHandle,
}

pub fn build_router(service: ServiceHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/data/historical", get(historical))
        .route("/ws/updates", get(updates))
        .with_state(AppState { service })
}

async fn health(State(state): State<AppState>) -> Response {
    match state.service.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn historical(State(state): State<AppState>) -> Response {
    match state.service.query().await {
        Ok(payload) => (
            [(header::CONTENT_TYPE, "application/json")],
            payload.to_string(),
        )
            .into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn updates(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| forward(socket, state.service))
}

/// Pump broadcast messages into one socket until either side goes away.
///
/// The hub drops a subscriber whose queue fills, which ends `recv` here and
/// closes the socket; the client is expected to reconnect and resync from
/// the fresh `data` message.
async fn forward(mut socket: WebSocket, service: ServiceHandle) {
    let Ok(mut subscription) = service.subscribe().await else {
        return;
    };
    debug!(subscriber = subscription.id(), "websocket subscribed");

    loop {
        tokio::select! {
            payload = subscription.recv() => {
                let Some(payload) = payload else {
                    break;
                };
                if socket.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(subscriber = subscription.id(), "websocket closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use downlink_hub::{HubConfig, TelemetryService};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    use super::*;

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut response = String::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .expect("response within timeout")
            .expect("read");
        response
    }

    #[tokio::test]
    async fn serves_health_and_history() {
        let shutdown = CancellationToken::new();
        let (service, handle) = TelemetryService::new(HubConfig::default(), shutdown.clone());
        let service = tokio::spawn(service.run());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, build_router(handle))
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }
        });

        let health = http_get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"), "{health}");
        assert!(health.contains("\"packets_applied\":0"));

        let history = http_get(addr, "/api/data/historical").await;
        assert!(history.starts_with("HTTP/1.1 200"), "{history}");
        assert!(history.contains("application/json"));
        assert!(history.contains("\"metric\""));
        assert!(history.contains("\"historic\""));

        let missing = http_get(addr, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

        shutdown.cancel();
        server.await.expect("server task").expect("server");
        service.await.expect("service task");
    }

    #[tokio::test]
    async fn health_reports_unavailable_after_shutdown() {
        let shutdown = CancellationToken::new();
        let (service, handle) = TelemetryService::new(HubConfig::default(), shutdown.clone());
        shutdown.cancel();
        service.run().await;

        let response = health(State(AppState { service: handle })).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
