use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::{Operation, Role, TunnelMetrics};
use crate::protocol::{StreamKind, TunnelStream, write_signature};
use crate::tunnelrpc::capability::{
    RegisterUdpSessionResponse, UdpSessionRegistration, UpdateConfigurationResponse,
};
use crate::tunnelrpc::client::config::TunnelClientConfig;
use crate::tunnelrpc::context::CallContext;
use crate::tunnelrpc::error::RpcError;
use crate::tunnelrpc::proto::rpc_request::Call;
use crate::tunnelrpc::proto::rpc_response::Outcome;
use crate::tunnelrpc::proto::{
    RpcRequest, RpcResponse, UnregisterUdpSessionRequest, UpdateConfigurationRequest,
};
use crate::tunnelrpc::transport::{MessageSink, MessageSource, RpcTransport};

type PendingCalls = DashMap<u64, oneshot::Sender<Option<Outcome>>, ahash::RandomState>;

/// Calls the session and configuration capabilities of the edge over one RPC stream.
///
/// The client handles:
/// - Announcing the stream as an RPC stream
/// - Correlating responses with calls, so calls may be issued from several tasks at once
/// - Bounding every call by the configured request timeout
/// - Recording one call count and one latency observation per call
///
/// Calls are never retried; deciding whether to reopen a stream is left to the caller.
///
/// # Example
///
/// ```ignore
/// let client = TunnelClient::connect(stream, TunnelClientConfig::default(), metrics).await?;
///
/// let registration = UdpSessionRegistration::builder()
///     .session_id(session_id)
///     .dst_ip("10.0.0.1".parse()?)
///     .dst_port(53)
///     .build();
/// client.register_udp_session(&CallContext::background(), &registration).await?;
///
/// client.close().await?;
/// ```
pub struct TunnelClient<S> {
    sink: Mutex<MessageSink<S>>,
    pending: Arc<PendingCalls>,
    closed: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    config: TunnelClientConfig,
    metrics: Arc<TunnelMetrics>,
}

impl<S> TunnelClient<S>
where
    S: TunnelStream,
{
    /// Announce `stream` as an RPC stream and start an RPC connection over it.
    pub async fn connect(
        mut stream: S,
        config: TunnelClientConfig,
        metrics: Arc<TunnelMetrics>,
    ) -> Result<Self, RpcError> {
        write_signature(&mut stream, StreamKind::Rpc).await?;

        let (source, sink) = RpcTransport::new(stream, config.max_frame_length).split();
        let pending = Arc::new(PendingCalls::default());
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            source,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        info!(
            request_timeout_ms = %config.request_timeout.as_millis(),
            "RPC client connected"
        );

        Ok(Self {
            sink: Mutex::new(sink),
            pending,
            closed,
            reader: Some(reader),
            next_id: AtomicU64::new(0),
            config,
            metrics,
        })
    }

    /// Ask the edge to route datagrams of `registration` to this agent.
    pub async fn register_udp_session(
        &self,
        ctx: &CallContext,
        registration: &UdpSessionRegistration,
    ) -> Result<RegisterUdpSessionResponse, RpcError> {
        debug!(
            session_id = %registration.session_id,
            dst_ip = %registration.dst_ip,
            dst_port = registration.dst_port,
            "Registering UDP session"
        );

        let call = Call::RegisterUdpSession(registration.into());
        self.call(ctx, Operation::RegisterUdpSession, call, |outcome| match outcome {
            Outcome::RegisterUdpSession(result) => Some(result.into()),
            _ => None,
        })
        .await
    }

    /// Ask the edge to forget a session. Unknown sessions are not an error.
    pub async fn unregister_udp_session(
        &self,
        ctx: &CallContext,
        session_id: Uuid,
        message: impl Into<String>,
    ) -> Result<(), RpcError> {
        debug!(session_id = %session_id, "Unregistering UDP session");

        let call = Call::UnregisterUdpSession(UnregisterUdpSessionRequest {
            session_id: session_id.as_bytes().to_vec(),
            message: message.into(),
        });
        self.call(ctx, Operation::UnregisterUdpSession, call, |outcome| match outcome {
            Outcome::UnregisterUdpSession(_) => Some(()),
            _ => None,
        })
        .await
    }

    /// Push configuration `version` to the edge.
    pub async fn update_configuration(
        &self,
        ctx: &CallContext,
        version: i32,
        config: Bytes,
    ) -> Result<UpdateConfigurationResponse, RpcError> {
        debug!(version, bytes = config.len(), "Pushing configuration");

        let call = Call::UpdateConfiguration(UpdateConfigurationRequest { version, config });
        self.call(ctx, Operation::UpdateConfiguration, call, |outcome| match outcome {
            Outcome::UpdateConfiguration(result) => Some(result.into()),
            _ => None,
        })
        .await
    }

    /// Close the RPC connection and then the transport beneath it.
    ///
    /// Both are always released. The first failure is returned; a failure of the transport
    /// after the connection already failed is only logged.
    pub async fn close(mut self) -> Result<(), RpcError> {
        let connection = self.close_connection().await;
        let transport = self.sink.get_mut().close().await;

        match (connection, transport) {
            (Err(err), Err(transport_err)) => {
                warn!(error = %transport_err, "Failed to close RPC transport");
                Err(err)
            }
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => {
                debug!("RPC client closed");
                Ok(())
            }
        }
    }

    pub fn config(&self) -> &TunnelClientConfig {
        &self.config
    }

    /// Whether the edge has closed the stream, after which every call fails.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn call<T>(
        &self,
        ctx: &CallContext,
        operation: Operation,
        call: Call,
        extract: impl FnOnce(Outcome) -> Option<T>,
    ) -> Result<T, RpcError> {
        let _timer = self.metrics.start_timer(Role::Client, operation);

        let result = self
            .round_trip(ctx, call)
            .await
            .and_then(|outcome| match outcome {
                Outcome::Rejected(status) => Err(RpcError::RemoteRejected(status.into())),
                outcome => extract(outcome).ok_or(RpcError::UnexpectedResponse(operation.as_str())),
            });

        if let Err(err) = &result {
            self.metrics.record_failure(Role::Client, operation);
            debug!(operation = %operation, error = %err, "RPC call failed");
        }

        result
    }

    async fn round_trip(&self, ctx: &CallContext, call: Call) -> Result<Outcome, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        // Checked after registering, so a reader shutting down concurrently either sees this
        // call when it clears the pending calls or has already raised the flag.
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }

        let deadline = ctx.deadline_within(self.config.request_timeout);
        let exchange = async {
            self.sink
                .lock()
                .await
                .send(&RpcRequest {
                    id,
                    call: Some(call),
                })
                .await?;

            let outcome = rx.await.map_err(|_| RpcError::ConnectionClosed)?;
            outcome.ok_or(RpcError::UnexpectedResponse("empty response"))
        };

        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(RpcError::Cancelled),
            result = tokio::time::timeout_at(deadline, exchange) => result?,
        }
    }

    async fn close_connection(&mut self) -> Result<(), RpcError> {
        self.closed.store(true, Ordering::Release);
        self.pending.clear();

        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        reader.abort();

        match reader.await {
            Err(err) if err.is_panic() => Err(RpcError::Task(err)),
            _ => Ok(()),
        }
    }
}

impl<S> Drop for TunnelClient<S> {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

/// Forgets a pending call however the call ends, so an abandoned call leaves nothing behind.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

async fn read_responses<S>(
    mut source: MessageSource<S>,
    pending: Arc<PendingCalls>,
    closed: Arc<AtomicBool>,
) where
    S: TunnelStream,
{
    loop {
        match source.recv::<RpcResponse>().await {
            Some(Ok(response)) => match pending.remove(&response.id) {
                Some((_, caller)) => {
                    let _ = caller.send(response.outcome);
                }
                None => {
                    debug!(id = response.id, "Discarding response to abandoned call");
                }
            },
            Some(Err(err)) => {
                warn!(error = %err, "Failed to read RPC response");
                break;
            }
            None => {
                debug!("RPC stream closed by peer");
                break;
            }
        }
    }

    // Wake every caller still waiting; their calls fail as closed. Calls starting after the flag
    // is raised fail without waiting.
    closed.store(true, Ordering::Release);
    pending.clear();
}
