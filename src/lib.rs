pub mod configuration;
pub mod connection;
pub mod connector;
pub mod header;
pub mod metrics;
pub mod protocol;
pub mod readiness;
pub mod session;
pub mod state_machine;
pub mod tunnelrpc;
pub mod tunnelstate;
