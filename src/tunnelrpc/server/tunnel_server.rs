use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::{Operation, Role, TunnelMetrics};
use crate::protocol::{BoxedStream, StreamKind, TunnelStream, determine_protocol};
use crate::tunnelrpc::capability::{
    ConfigurationManager, SessionManager, TunnelCapability, TunnelService,
    UdpSessionRegistration, parse_session_id,
};
use crate::tunnelrpc::error::RpcError;
use crate::tunnelrpc::proto::rpc_request::Call;
use crate::tunnelrpc::proto::rpc_response::Outcome;
use crate::tunnelrpc::proto::{RpcRequest, RpcResponse, UnregisterUdpSessionResult};
use crate::tunnelrpc::server::config::TunnelServerConfig;
use crate::tunnelrpc::transport::RpcTransport;

/// Handles streams that carry proxied requests rather than RPC.
#[tonic::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle_request(
        &self,
        cancellation: CancellationToken,
        stream: RequestServerStream,
    ) -> Result<(), RpcError>;
}

/// A data stream with its signature already consumed.
pub struct RequestServerStream {
    stream: BoxedStream,
}

impl RequestServerStream {
    fn new(stream: impl TunnelStream) -> Self {
        Self {
            stream: Box::new(stream),
        }
    }
}

impl AsyncRead for RequestServerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for RequestServerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Session bookkeeping implied by a completed call.
enum SessionChange {
    Registered(Uuid),
    Unregistered(Uuid),
}

/// Serves the streams the edge opens towards this process.
///
/// Each stream is classified by its signature. Data streams go to the [`RequestHandler`]; RPC
/// streams are served against the composed session and configuration capabilities until the
/// peer closes the stream, the cancellation token fires or the response timeout elapses.
///
/// Sessions registered over an RPC stream belong to it: those still registered when the stream
/// ends are unregistered.
pub struct TunnelServer {
    request_handler: Arc<dyn RequestHandler>,
    capability: Arc<dyn TunnelCapability>,
    config: TunnelServerConfig,
    metrics: Arc<TunnelMetrics>,
}

impl TunnelServer {
    pub fn new<H, S, C>(
        request_handler: H,
        sessions: S,
        configuration: C,
        config: TunnelServerConfig,
        metrics: Arc<TunnelMetrics>,
    ) -> Self
    where
        H: RequestHandler,
        S: SessionManager,
        C: ConfigurationManager,
    {
        Self {
            request_handler: Arc::new(request_handler),
            capability: Arc::new(TunnelService::new(sessions, configuration)),
            config,
            metrics,
        }
    }

    /// Classify `stream` and serve it to completion.
    ///
    /// A stream with an unreadable or unknown signature is rejected without being routed
    /// anywhere; closing it is up to the caller. Ending an RPC stream is never an error.
    pub async fn serve<S>(
        &self,
        cancellation: CancellationToken,
        mut stream: S,
    ) -> Result<(), RpcError>
    where
        S: TunnelStream,
    {
        let kind = determine_protocol(&mut stream).await?;
        debug!(kind = %kind, "Classified tunnel stream");

        match kind {
            StreamKind::Data => {
                self.request_handler
                    .handle_request(cancellation, RequestServerStream::new(stream))
                    .await
            }
            StreamKind::Rpc => {
                self.serve_rpc(cancellation, stream).await;
                Ok(())
            }
        }
    }

    pub fn config(&self) -> &TunnelServerConfig {
        &self.config
    }

    async fn serve_rpc<S>(&self, cancellation: CancellationToken, stream: S)
    where
        S: TunnelStream,
    {
        let (mut source, mut sink) =
            RpcTransport::new(stream, self.config.max_frame_length).split();
        let deadline = Instant::now().checked_add(self.config.response_timeout);
        let mut sessions = HashSet::new();

        info!("Serving RPC stream");

        let mut record = |change: Option<SessionChange>| match change {
            Some(SessionChange::Registered(session_id)) => {
                sessions.insert(session_id);
            }
            Some(SessionChange::Unregistered(session_id)) => {
                sessions.remove(&session_id);
            }
            None => {}
        };

        let connection = async {
            let mut in_flight = FuturesUnordered::new();
            let mut peer_closed = false;

            loop {
                tokio::select! {
                    request = source.recv::<RpcRequest>() => match request {
                        Some(Ok(request)) => in_flight.push(self.dispatch(request)),
                        Some(Err(err)) => {
                            warn!(error = %err, "Failed to read RPC request");
                            break;
                        }
                        None => {
                            peer_closed = true;
                            break;
                        }
                    },
                    Some((response, change)) = in_flight.next(), if !in_flight.is_empty() => {
                        record(change);
                        if let Err(err) = sink.send(&response).await {
                            warn!(error = %err, "Failed to send RPC response");
                            return;
                        }
                    }
                }
            }

            // The peer may stop sending while still waiting for answers.
            if peer_closed {
                while let Some((response, change)) = in_flight.next().await {
                    record(change);
                    if let Err(err) = sink.send(&response).await {
                        warn!(error = %err, "Failed to send RPC response");
                        return;
                    }
                }
            }
        };

        let response_timeout = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = connection => debug!("RPC connection finished"),
            _ = cancellation.cancelled() => debug!("RPC stream cancelled"),
            _ = response_timeout => debug!("RPC stream reached its response timeout"),
        }

        if let Err(err) = sink.close().await {
            debug!(error = %err, "Failed to close RPC stream");
        }

        self.release_sessions(sessions).await;
    }

    async fn release_sessions(&self, sessions: HashSet<Uuid>) {
        for session_id in sessions {
            match self
                .capability
                .unregister_udp_session(session_id, "RPC stream closed".to_string())
                .await
            {
                Ok(()) => debug!(
                    session_id = %session_id,
                    "Released UDP session of closed RPC stream"
                ),
                Err(status) => warn!(
                    session_id = %session_id,
                    status = %status.message(),
                    "Failed to release UDP session of closed RPC stream"
                ),
            }
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> (RpcResponse, Option<SessionChange>) {
        let id = request.id;
        let Some(call) = request.call else {
            let response = RpcResponse {
                id,
                outcome: Some(Outcome::Rejected(
                    Status::invalid_argument("request carries no call").into(),
                )),
            };
            return (response, None);
        };

        let operation = operation_of(&call);
        let _timer = self.metrics.start_timer(Role::Server, operation);

        let (outcome, change) = self.handle_call(call).await.unwrap_or_else(|status| {
            self.metrics.record_failure(Role::Server, operation);
            debug!(operation = %operation, status = %status.message(), "RPC call rejected");
            (Outcome::Rejected(status.into()), None)
        });

        let response = RpcResponse {
            id,
            outcome: Some(outcome),
        };
        (response, change)
    }

    async fn handle_call(&self, call: Call) -> Result<(Outcome, Option<SessionChange>), Status> {
        match call {
            Call::RegisterUdpSession(request) => {
                let registration = UdpSessionRegistration::try_from(request)?;
                let session_id = registration.session_id;
                let response = self.capability.register_udp_session(registration).await?;
                Ok((
                    Outcome::RegisterUdpSession(response.into()),
                    Some(SessionChange::Registered(session_id)),
                ))
            }
            Call::UnregisterUdpSession(request) => {
                let session_id = parse_session_id(&request.session_id)?;
                self.capability
                    .unregister_udp_session(session_id, request.message)
                    .await?;
                Ok((
                    Outcome::UnregisterUdpSession(UnregisterUdpSessionResult {}),
                    Some(SessionChange::Unregistered(session_id)),
                ))
            }
            Call::UpdateConfiguration(request) => {
                let response = self
                    .capability
                    .update_configuration(request.version, request.config)
                    .await?;
                Ok((Outcome::UpdateConfiguration(response.into()), None))
            }
        }
    }
}

fn operation_of(call: &Call) -> Operation {
    match call {
        Call::RegisterUdpSession(_) => Operation::RegisterUdpSession,
        Call::UnregisterUdpSession(_) => Operation::UnregisterUdpSession,
        Call::UpdateConfiguration(_) => Operation::UpdateConfiguration,
    }
}
