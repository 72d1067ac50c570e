//! Server side of the tunnel RPC service.
//!
//! [`TunnelServer::serve`] takes every stream the edge opens, reads its signature and either
//! hands it to the data path or serves RPC calls on it.

mod config;
mod tunnel_server;

pub use config::TunnelServerConfig;
pub use tunnel_server::{RequestHandler, RequestServerStream, TunnelServer};
