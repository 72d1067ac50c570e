//! # tunnelrpc
//!
//! The session and configuration service spoken between an agent and the edge over a tunnel
//! stream announced with the RPC signature.
//!
//! ## Client Side
//!
//! [`TunnelClient`] writes the RPC signature, then issues calls. Every call is bounded by the
//! earlier of the caller's [`CallContext`] deadline and the configured request timeout.
//!
//! ```ignore
//! let client = TunnelClient::connect(stream, TunnelClientConfig::default(), metrics).await?;
//!
//! let response = client
//!     .update_configuration(&CallContext::background(), 7, config)
//!     .await?;
//! ```
//!
//! ## Server Side
//!
//! [`TunnelServer`] classifies each stream it is given. RPC streams are served against a
//! [`SessionManager`] and a [`ConfigurationManager`]; data streams go to a [`RequestHandler`].
//!
//! ```ignore
//! let server = TunnelServer::new(
//!     handler,
//!     UdpSessionMap::new(),
//!     ConfigStore::new(),
//!     TunnelServerConfig::default(),
//!     metrics,
//! );
//!
//! server.serve(cancellation, stream).await?;
//! ```
//!
//! ## Wire Format
//!
//! After the 6 byte signature both directions carry protobuf messages, each prefixed with its
//! length as a 4 byte big endian integer. Requests carry an id echoed by their response, so a
//! slow call does not hold up the calls issued after it.

pub mod capability;
pub mod client;
pub mod context;
pub mod error;
pub mod proto;
pub mod server;
pub mod transport;

pub use capability::{
    ConfigurationManager, RegisterUdpSessionResponse, SessionManager, TunnelCapability,
    TunnelService, UdpSessionRegistration, UpdateConfigurationResponse,
};
pub use client::{TunnelClient, TunnelClientConfig};
pub use context::CallContext;
pub use error::RpcError;
pub use server::{RequestHandler, RequestServerStream, TunnelServer, TunnelServerConfig};
