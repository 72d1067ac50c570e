use std::time::Duration;

use bon::Builder;

use crate::tunnelrpc::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Configuration for the tunnel RPC client.
#[derive(Debug, Clone, Builder)]
pub struct TunnelClientConfig {
    /// Upper bound of every call, applied on top of any deadline of the caller.
    #[builder(default = Duration::from_secs(5))]
    pub request_timeout: Duration,

    /// Largest response frame accepted from the edge.
    #[builder(default = DEFAULT_MAX_FRAME_LENGTH)]
    pub max_frame_length: usize,
}

impl Default for TunnelClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
