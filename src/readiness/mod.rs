//! Readiness of the agent, derived from the state of its tunnel connections.
//!
//! The agent is ready while at least one connection slot is connected.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{Event, EventSink};
use crate::connector::ConnectorId;
use crate::metrics::TunnelMetrics;
use crate::tunnelstate::ConnTracker;

/// A point in time view of the agent's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub active_connections: usize,
    pub connector_id: ConnectorId,
}

/// Body of `GET /ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    /// The HTTP status code of the response, repeated for clients that only see the body.
    pub status: u16,
    pub ready_connections: usize,
    pub connector_id: ConnectorId,
}

/// Owns the connection tracker of the agent and answers readiness queries from it.
#[derive(Debug)]
pub struct ReadyServer {
    connector_id: ConnectorId,
    tracker: Arc<ConnTracker>,
    metrics: Arc<TunnelMetrics>,
}

impl ReadyServer {
    pub fn new(
        connector_id: ConnectorId,
        tracker: Arc<ConnTracker>,
        metrics: Arc<TunnelMetrics>,
    ) -> Self {
        Self {
            connector_id,
            tracker,
            metrics,
        }
    }

    pub fn connector_id(&self) -> ConnectorId {
        self.connector_id
    }

    pub fn on_tunnel_event(&self, event: Event) {
        self.tracker.on_tunnel_event(event);
    }

    pub fn readiness(&self) -> Readiness {
        let active_connections = self.tracker.count_active_connections();
        Readiness {
            ready: active_connections > 0,
            active_connections,
            connector_id: self.connector_id,
        }
    }

    /// Routes exposing `GET /ready` and `GET /metrics`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/ready", get(ready))
            .route("/metrics", get(metrics))
            .with_state(self)
    }
}

impl EventSink for ReadyServer {
    fn on_tunnel_event(&self, event: Event) {
        ReadyServer::on_tunnel_event(self, event);
    }
}

async fn ready(State(server): State<Arc<ReadyServer>>) -> (StatusCode, Json<ReadyResponse>) {
    let readiness = server.readiness();
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    debug!(
        ready = readiness.ready,
        active_connections = readiness.active_connections,
        "Readiness requested"
    );

    (
        status,
        Json(ReadyResponse {
            status: status.as_u16(),
            ready_connections: readiness.active_connections,
            connector_id: readiness.connector_id,
        }),
    )
}

async fn metrics(State(server): State<Arc<ReadyServer>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        server.metrics.render_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::connection::{EventType, Protocol};

    fn ready_server() -> Arc<ReadyServer> {
        let metrics = Arc::new(TunnelMetrics::new());
        let tracker = Arc::new(ConnTracker::new(Arc::clone(&metrics)));
        Arc::new(ReadyServer::new(ConnectorId::new(Uuid::nil()), tracker, metrics))
    }

    async fn request_ready(server: &Arc<ReadyServer>) -> (StatusCode, ReadyResponse) {
        let response = Arc::clone(server)
            .router()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_readiness_follows_connection_events() {
        let server = ready_server();

        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, 503);
        assert_eq!(body.ready_connections, 0);
        assert_eq!(body.connector_id, ConnectorId::new(Uuid::nil()));

        server.on_tunnel_event(Event::connected(1, Protocol::Http2));
        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.ready_connections, 1);

        server.on_tunnel_event(Event::connected(2, Protocol::Http2));
        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.ready_connections, 2);

        server.on_tunnel_event(Event::new(2, EventType::Reconnecting));
        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.ready_connections, 1);

        server.on_tunnel_event(Event::new(1, EventType::RegisteringTunnel));
        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.ready_connections, 0);

        server.on_tunnel_event(Event::connected(1, Protocol::Http2));
        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.ready_connections, 1);

        server.on_tunnel_event(Event::new(1, EventType::Unregistering));
        let (status, _) = request_ready(&server).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        server.on_tunnel_event(Event::new(1, EventType::Disconnected));
        let (status, body) = request_ready(&server).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.ready_connections, 0);
    }

    #[tokio::test]
    async fn test_ready_body_field_names() {
        let server = ready_server();
        server.on_tunnel_event(Event::connected(0, Protocol::Quic));

        let response = Arc::clone(&server)
            .router()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], 200);
        assert_eq!(json["readyConnections"], 1);
        assert_eq!(json["connectorId"], Uuid::nil().to_string());
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let server = ready_server();
        server.on_tunnel_event(Event::connected(0, Protocol::Quic));

        let response = Arc::clone(&server)
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("tunnellink_tunnel_events_total{event=\"connected\"} 1"));
    }
}
