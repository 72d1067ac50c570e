//! Protobuf messages exchanged on an RPC stream.
//!
//! Every frame sent by the caller is an [`RpcRequest`] and every frame sent back is an
//! [`RpcResponse`] carrying the same `id`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcRequest {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(oneof = "rpc_request::Call", tags = "2, 3, 4")]
    pub call: Option<rpc_request::Call>,
}

pub mod rpc_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Call {
        #[prost(message, tag = "2")]
        RegisterUdpSession(super::RegisterUdpSessionRequest),
        #[prost(message, tag = "3")]
        UnregisterUdpSession(super::UnregisterUdpSessionRequest),
        #[prost(message, tag = "4")]
        UpdateConfiguration(super::UpdateConfigurationRequest),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcResponse {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(oneof = "rpc_response::Outcome", tags = "2, 3, 4, 5")]
    pub outcome: Option<rpc_response::Outcome>,
}

pub mod rpc_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Outcome {
        #[prost(message, tag = "2")]
        RegisterUdpSession(super::RegisterUdpSessionResult),
        #[prost(message, tag = "3")]
        UnregisterUdpSession(super::UnregisterUdpSessionResult),
        #[prost(message, tag = "4")]
        UpdateConfiguration(super::UpdateConfigurationResult),
        #[prost(message, tag = "5")]
        Rejected(super::RpcStatus),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterUdpSessionRequest {
    /// 16 byte UUID.
    #[prost(bytes = "vec", tag = "1")]
    pub session_id: Vec<u8>,
    /// 4 byte IPv4 or 16 byte IPv6 address.
    #[prost(bytes = "vec", tag = "2")]
    pub dst_ip: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub dst_port: u32,
    #[prost(uint64, tag = "4")]
    pub close_after_idle_hint_ms: u64,
    #[prost(string, tag = "5")]
    pub trace_context: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterUdpSessionResult {
    #[prost(bytes = "vec", tag = "1")]
    pub spans: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnregisterUdpSessionRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub session_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnregisterUdpSessionResult {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateConfigurationRequest {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(bytes = "bytes", tag = "2")]
    pub config: ::bytes::Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateConfigurationResult {
    #[prost(int32, tag = "1")]
    pub last_applied_version: i32,
    #[prost(string, optional, tag = "2")]
    pub error: Option<String>,
}

/// Why the serving side refused a call, mirroring a `tonic::Status`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl From<tonic::Status> for RpcStatus {
    fn from(status: tonic::Status) -> Self {
        Self {
            code: status.code() as i32,
            message: status.message().to_string(),
        }
    }
}

impl From<RpcStatus> for tonic::Status {
    fn from(status: RpcStatus) -> Self {
        tonic::Status::new(tonic::Code::from_i32(status.code), status.message)
    }
}
