use std::time::Duration;

use bon::Builder;

use crate::tunnelrpc::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Configuration for the tunnel RPC server.
#[derive(Debug, Clone, Builder)]
pub struct TunnelServerConfig {
    /// How long a single RPC stream is served before it is closed.
    ///
    /// A timeout too large to be represented as a deadline, such as `Duration::MAX`, serves each
    /// stream until the peer closes it or the server is cancelled.
    #[builder(default = Duration::from_secs(60))]
    pub response_timeout: Duration,

    /// Largest request frame accepted from the caller.
    #[builder(default = DEFAULT_MAX_FRAME_LENGTH)]
    pub max_frame_length: usize,
}

impl Default for TunnelServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
