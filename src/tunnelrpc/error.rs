use std::io;

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors that can occur on either side of a tunnel RPC connection.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Reading or writing the underlying stream failed.
    #[error("RPC transport error")]
    Transport(#[from] io::Error),

    /// The call did not complete before its deadline.
    #[error("timeout waiting for RPC response")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// The caller cancelled the call.
    #[error("RPC call cancelled")]
    Cancelled,

    /// The RPC connection was closed before a response arrived.
    #[error("RPC connection closed")]
    ConnectionClosed,

    /// The remote side explicitly refused the call.
    #[error("rejected by remote: {}", .0.message())]
    RemoteRejected(tonic::Status),

    /// Failed to decode a protobuf message.
    #[error("protobuf decode error")]
    Decode(#[from] prost::DecodeError),

    /// The response did not match the call it answers.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    /// The stream could not be classified.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The background task reading responses failed.
    #[error("RPC connection task failed")]
    Task(#[from] tokio::task::JoinError),

    /// The handler of a data stream failed.
    #[error("data stream handler failed")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RpcError {
    /// Whether this is an I/O, deadline or cancellation failure rather than a decision of the
    /// remote side. Reconnecting may help with these; it will not help with a rejection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_)
                | RpcError::Timeout(_)
                | RpcError::Cancelled
                | RpcError::ConnectionClosed
                | RpcError::Protocol(ProtocolError::Io(_))
        )
    }
}
