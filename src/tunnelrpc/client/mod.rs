//! Client side of the tunnel RPC service.
//!
//! The agent opens a stream on one of its tunnel connections and hands it to
//! [`TunnelClient::connect`], which announces the stream as an RPC stream and then issues
//! session and configuration calls over it.

mod config;
mod tunnel_client;

pub use config::TunnelClientConfig;
pub use tunnel_client::TunnelClient;
