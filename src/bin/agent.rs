use anyhow::{Context, Result};
use bytes::Bytes;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tunnellink::connection::{Event, EventSink, EventType, Protocol};
use tunnellink::connector::ConnectorId;
use tunnellink::metrics::TunnelMetrics;
use tunnellink::readiness::ReadyServer;
use tunnellink::tunnelrpc::{
    CallContext, RpcError, TunnelClient, TunnelClientConfig, UdpSessionRegistration,
};
use tunnellink::tunnelstate::ConnTracker;
use uuid::Uuid;

const DEFAULT_EDGE_ADDR: &str = "127.0.0.1:7844";
const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:2000";
const DEFAULT_HA_CONNECTIONS: u8 = 4;
const DEFAULT_UDP_DESTINATION: &str = "1.1.1.1:53";

const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_EXPONENT: u32 = 5;
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);
const UDP_IDLE_HINT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let edge_addr = std::env::var("EDGE_ADDR").unwrap_or_else(|_| DEFAULT_EDGE_ADDR.to_string());
    let metrics_addr =
        std::env::var("METRICS_ADDR").unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string());
    let ha_connections = match std::env::var("HA_CONNECTIONS") {
        Ok(value) => value
            .parse::<u8>()
            .with_context(|| format!("invalid HA_CONNECTIONS '{value}'"))?,
        Err(_) => DEFAULT_HA_CONNECTIONS,
    };
    let udp_destination: SocketAddr = std::env::var("UDP_DESTINATION")
        .unwrap_or_else(|_| DEFAULT_UDP_DESTINATION.to_string())
        .parse()
        .context("invalid UDP_DESTINATION")?;
    let connector_id = match std::env::var("CONNECTOR_ID") {
        Ok(value) => value
            .parse::<ConnectorId>()
            .with_context(|| format!("invalid CONNECTOR_ID '{value}'"))?,
        Err(_) => ConnectorId::generate(),
    };

    let metrics = Arc::new(TunnelMetrics::new());
    let tracker = Arc::new(ConnTracker::new(Arc::clone(&metrics)));
    let ready = Arc::new(ReadyServer::new(
        connector_id,
        tracker,
        Arc::clone(&metrics),
    ));

    let listener = TcpListener::bind(&metrics_addr).await?;
    let router = Arc::clone(&ready).router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Readiness server error: {e}");
        }
    });

    info!(
        connector_id = %connector_id,
        edge_addr = %edge_addr,
        metrics_addr = %metrics_addr,
        ha_connections,
        "Agent starting"
    );

    let shutdown = CancellationToken::new();
    let connections: Vec<_> = (0..ha_connections)
        .map(|index| {
            let connection = TunnelConnection {
                index,
                edge_addr: edge_addr.clone(),
                udp_destination,
                connector_id,
                events: Arc::clone(&ready) as Arc<dyn EventSink>,
                metrics: Arc::clone(&metrics),
            };
            tokio::spawn(connection.run(shutdown.child_token()))
        })
        .collect();

    tokio::signal::ctrl_c().await?;
    info!("Agent shutting down");
    shutdown.cancel();

    for connection in connections {
        if let Err(e) = connection.await {
            warn!(error = %e, "Connection task failed");
        }
    }

    Ok(())
}

/// One connection slot, kept open against the edge until shutdown.
struct TunnelConnection {
    index: u8,
    edge_addr: String,
    udp_destination: SocketAddr,
    connector_id: ConnectorId,
    events: Arc<dyn EventSink>,
    metrics: Arc<TunnelMetrics>,
}

impl TunnelConnection {
    async fn run(self, shutdown: CancellationToken) {
        let mut backoff = ReconnectBackoff::default();

        while !shutdown.is_cancelled() {
            self.emit(EventType::RegisteringTunnel);

            match self.serve(&shutdown, &mut backoff).await {
                Ok(()) => {
                    self.emit(EventType::Disconnected);
                    break;
                }
                Err(e) if e.is_transport() => {
                    warn!(slot = self.index, error = %e, "Tunnel connection lost");
                    self.emit(EventType::Reconnecting);
                }
                Err(e) => {
                    error!(slot = self.index, error = %e, "Tunnel connection failed");
                    self.emit(EventType::Reconnecting);
                }
            }

            let delay = backoff.next_delay();
            debug!(slot = self.index, delay_ms = %delay.as_millis(), "Waiting before reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => self.emit(EventType::Disconnected),
            }
        }
    }

    /// Runs one connection to completion. `Ok` means the agent is shutting down.
    async fn serve(
        &self,
        shutdown: &CancellationToken,
        backoff: &mut ReconnectBackoff,
    ) -> Result<(), RpcError> {
        let stream = TcpStream::connect(&self.edge_addr).await?;
        let client = TunnelClient::connect(
            stream,
            TunnelClientConfig::default(),
            Arc::clone(&self.metrics),
        )
        .await?;

        let ctx = CallContext::new(shutdown.clone());

        if self.index == 0 {
            let config = serde_json::json!({
                "connectorId": self.connector_id,
                "udpDestination": self.udp_destination.to_string(),
            });
            let response = client
                .update_configuration(&ctx, 0, Bytes::from(config.to_string()))
                .await?;
            if let Some(reason) = &response.error {
                warn!(
                    slot = self.index,
                    last_applied_version = response.last_applied_version,
                    reason = %reason,
                    "Edge kept its configuration"
                );
            }
        }

        let registration = UdpSessionRegistration::builder()
            .session_id(Uuid::new_v4())
            .dst_ip(self.udp_destination.ip())
            .dst_port(self.udp_destination.port())
            .close_idle_after_hint(UDP_IDLE_HINT)
            .build();
        client.register_udp_session(&ctx, &registration).await?;

        self.events
            .on_tunnel_event(Event::connected(self.index, Protocol::Http2));
        backoff.reset();
        info!(slot = self.index, session_id = %registration.session_id, "Tunnel connected");

        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
        loop {
            tokio::select! {
                _ = liveness.tick() => {
                    if client.is_closed() {
                        return Err(RpcError::ConnectionClosed);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        self.emit(EventType::Unregistering);

        // The shutdown token already fired, so unregistering gets a context of its own.
        let unregister = CallContext::background();
        if let Err(e) = client
            .unregister_udp_session(&unregister, registration.session_id, "agent shutting down")
            .await
        {
            debug!(slot = self.index, error = %e, "Failed to unregister UDP session");
        }

        client.close().await
    }

    fn emit(&self, event_type: EventType) {
        self.events.on_tunnel_event(Event::new(self.index, event_type));
    }
}

/// Jittered exponential backoff between reconnects, starting over once a connection succeeds.
#[derive(Debug, Default)]
struct ReconnectBackoff {
    attempt: u32,
}

impl ReconnectBackoff {
    /// Random delay below `BASE_RECONNECT_DELAY * 2^attempt`.
    fn next_delay(&mut self) -> Duration {
        let max = self.max_delay();
        self.attempt = (self.attempt + 1).min(MAX_RECONNECT_EXPONENT);

        let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }

    fn max_delay(&self) -> Duration {
        BASE_RECONNECT_DELAY * 2u32.pow(self.attempt)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}
