use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunnellink::configuration::ConfigStore;
use tunnellink::metrics::TunnelMetrics;
use tunnellink::session::UdpSessionMap;
use tunnellink::tunnelrpc::{
    RequestHandler, RequestServerStream, RpcError, TunnelServer, TunnelServerConfig,
};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7844";

/// Writes every data stream back to its sender.
struct EchoHandler;

#[tonic::async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_request(
        &self,
        cancellation: CancellationToken,
        stream: RequestServerStream,
    ) -> Result<(), RpcError> {
        let (mut reader, mut writer) = tokio::io::split(stream);

        tokio::select! {
            copied = tokio::io::copy(&mut reader, &mut writer) => {
                debug!(bytes = copied?, "Echoed data stream");
            }
            _ = cancellation.cancelled() => debug!("Data stream cancelled"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let listen_addr =
        std::env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    let metrics = Arc::new(TunnelMetrics::new());
    let sessions = Arc::new(UdpSessionMap::new());
    let server = Arc::new(TunnelServer::new(
        EchoHandler,
        Arc::clone(&sessions),
        ConfigStore::new(),
        // Agents hold their RPC stream open for the lifetime of a connection; sessions registered
        // over it are released when it closes.
        TunnelServerConfig::builder()
            .response_timeout(Duration::MAX)
            .build(),
        Arc::clone(&metrics),
    ));

    let listener = TcpListener::bind(&listen_addr).await?;
    info!(listen_addr = %listen_addr, "Edge accepting tunnel streams");

    let shutdown = CancellationToken::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Tunnel stream opened");
                    spawn_stream(Arc::clone(&server), shutdown.child_token(), stream, peer.to_string());
                }
                Err(e) => warn!(error = %e, "Failed to accept tunnel stream"),
            },

            _ = tokio::signal::ctrl_c() => {
                info!(
                    active_sessions = sessions.active_session_count(),
                    "Edge shutting down"
                );
                shutdown.cancel();
                break;
            }
        }
    }

    Ok(())
}

fn spawn_stream(
    server: Arc<TunnelServer>,
    cancellation: CancellationToken,
    stream: TcpStream,
    peer: String,
) {
    tokio::spawn(async move {
        match server.serve(cancellation, stream).await {
            Ok(()) => debug!(peer = %peer, "Tunnel stream finished"),
            Err(e) => warn!(peer = %peer, error = %e, "Tunnel stream failed"),
        }
    });
}
