//! The capabilities an RPC connection serves and the values they exchange.
//!
//! Session management and configuration management are defined independently. An RPC connection
//! dispatches to a single [`TunnelCapability`], normally a [`TunnelService`] composing one
//! implementation of each, so a caller never needs to know which capability a call targets.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use bytes::Bytes;
use tonic::Status;
use uuid::Uuid;

use crate::tunnelrpc::proto;

/// A UDP flow the edge should route to this agent.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct UdpSessionRegistration {
    pub session_id: Uuid,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    /// How long the flow may stay idle before the edge may drop it.
    #[builder(default)]
    pub close_idle_after_hint: Duration,
    #[builder(default, into)]
    pub trace_context: String,
}

impl From<&UdpSessionRegistration> for proto::RegisterUdpSessionRequest {
    fn from(registration: &UdpSessionRegistration) -> Self {
        let dst_ip = match registration.dst_ip {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        };

        Self {
            session_id: registration.session_id.as_bytes().to_vec(),
            dst_ip,
            dst_port: u32::from(registration.dst_port),
            close_after_idle_hint_ms: u64::try_from(registration.close_idle_after_hint.as_millis())
                .unwrap_or(u64::MAX),
            trace_context: registration.trace_context.clone(),
        }
    }
}

impl TryFrom<proto::RegisterUdpSessionRequest> for UdpSessionRegistration {
    type Error = Status;

    fn try_from(request: proto::RegisterUdpSessionRequest) -> Result<Self, Self::Error> {
        let dst_ip = match request.dst_ip.len() {
            4 => <[u8; 4]>::try_from(request.dst_ip.as_slice()).map(IpAddr::from).ok(),
            16 => <[u8; 16]>::try_from(request.dst_ip.as_slice()).map(IpAddr::from).ok(),
            _ => None,
        }
        .ok_or_else(|| Status::invalid_argument("destination IP must be 4 or 16 bytes"))?;

        let dst_port = u16::try_from(request.dst_port)
            .map_err(|_| Status::invalid_argument("destination port out of range"))?;

        Ok(Self {
            session_id: parse_session_id(&request.session_id)?,
            dst_ip,
            dst_port,
            close_idle_after_hint: Duration::from_millis(request.close_after_idle_hint_ms),
            trace_context: request.trace_context,
        })
    }
}

pub(crate) fn parse_session_id(bytes: &[u8]) -> Result<Uuid, Status> {
    Uuid::from_slice(bytes).map_err(|_| Status::invalid_argument("session id must be 16 bytes"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterUdpSessionResponse {
    /// Serialized trace spans collected while registering, empty when tracing is off.
    pub spans: Vec<u8>,
}

impl From<RegisterUdpSessionResponse> for proto::RegisterUdpSessionResult {
    fn from(response: RegisterUdpSessionResponse) -> Self {
        Self {
            spans: response.spans,
        }
    }
}

impl From<proto::RegisterUdpSessionResult> for RegisterUdpSessionResponse {
    fn from(result: proto::RegisterUdpSessionResult) -> Self {
        Self {
            spans: result.spans,
        }
    }
}

/// Outcome of pushing a configuration version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateConfigurationResponse {
    /// The version in effect after the update was considered.
    pub last_applied_version: i32,
    /// Why the pushed version was not applied, if it was not.
    pub error: Option<String>,
}

impl UpdateConfigurationResponse {
    pub fn is_applied(&self) -> bool {
        self.error.is_none()
    }
}

impl From<UpdateConfigurationResponse> for proto::UpdateConfigurationResult {
    fn from(response: UpdateConfigurationResponse) -> Self {
        Self {
            last_applied_version: response.last_applied_version,
            error: response.error,
        }
    }
}

impl From<proto::UpdateConfigurationResult> for UpdateConfigurationResponse {
    fn from(result: proto::UpdateConfigurationResult) -> Self {
        Self {
            last_applied_version: result.last_applied_version,
            error: result.error,
        }
    }
}

/// Registration and removal of UDP sessions.
#[tonic::async_trait]
pub trait SessionManager: Send + Sync + 'static {
    async fn register_udp_session(
        &self,
        registration: UdpSessionRegistration,
    ) -> Result<RegisterUdpSessionResponse, Status>;

    /// Unregistering a session that is not known must not be treated as fatal by callers.
    async fn unregister_udp_session(&self, session_id: Uuid, message: String)
    -> Result<(), Status>;
}

/// Application of pushed configuration versions.
#[tonic::async_trait]
pub trait ConfigurationManager: Send + Sync + 'static {
    async fn update_configuration(
        &self,
        version: i32,
        config: Bytes,
    ) -> Result<UpdateConfigurationResponse, Status>;
}

/// Everything an RPC connection can be asked to do.
pub trait TunnelCapability: SessionManager + ConfigurationManager {}

impl<T> TunnelCapability for T where T: SessionManager + ConfigurationManager {}

/// Serves both capabilities by delegating to one implementation of each.
#[derive(Debug, Clone)]
pub struct TunnelService<S, C> {
    sessions: S,
    configuration: C,
}

impl<S, C> TunnelService<S, C>
where
    S: SessionManager,
    C: ConfigurationManager,
{
    pub fn new(sessions: S, configuration: C) -> Self {
        Self {
            sessions,
            configuration,
        }
    }
}

#[tonic::async_trait]
impl<S, C> SessionManager for TunnelService<S, C>
where
    S: SessionManager,
    C: ConfigurationManager,
{
    async fn register_udp_session(
        &self,
        registration: UdpSessionRegistration,
    ) -> Result<RegisterUdpSessionResponse, Status> {
        self.sessions.register_udp_session(registration).await
    }

    async fn unregister_udp_session(
        &self,
        session_id: Uuid,
        message: String,
    ) -> Result<(), Status> {
        self.sessions
            .unregister_udp_session(session_id, message)
            .await
    }
}

#[tonic::async_trait]
impl<S, C> ConfigurationManager for TunnelService<S, C>
where
    S: SessionManager,
    C: ConfigurationManager,
{
    async fn update_configuration(
        &self,
        version: i32,
        config: Bytes,
    ) -> Result<UpdateConfigurationResponse, Status> {
        self.configuration
            .update_configuration(version, config)
            .await
    }
}

#[tonic::async_trait]
impl<T> SessionManager for Arc<T>
where
    T: SessionManager + ?Sized,
{
    async fn register_udp_session(
        &self,
        registration: UdpSessionRegistration,
    ) -> Result<RegisterUdpSessionResponse, Status> {
        (**self).register_udp_session(registration).await
    }

    async fn unregister_udp_session(
        &self,
        session_id: Uuid,
        message: String,
    ) -> Result<(), Status> {
        (**self).unregister_udp_session(session_id, message).await
    }
}

#[tonic::async_trait]
impl<T> ConfigurationManager for Arc<T>
where
    T: ConfigurationManager + ?Sized,
{
    async fn update_configuration(
        &self,
        version: i32,
        config: Bytes,
    ) -> Result<UpdateConfigurationResponse, Status> {
        (**self).update_configuration(version, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_registration_wire_conversion() {
        let registration = UdpSessionRegistration::builder()
            .session_id(Uuid::new_v4())
            .dst_ip(IpAddr::V6(Ipv6Addr::LOCALHOST))
            .dst_port(53)
            .close_idle_after_hint(Duration::from_secs(30))
            .trace_context("trace-id")
            .build();

        let request = proto::RegisterUdpSessionRequest::from(&registration);
        assert_eq!(request.dst_ip.len(), 16);
        assert_eq!(request.close_after_idle_hint_ms, 30_000);

        let decoded = UdpSessionRegistration::try_from(request).unwrap();
        assert_eq!(decoded, registration);
    }

    #[test]
    fn test_malformed_registration_is_invalid_argument() {
        let request = proto::RegisterUdpSessionRequest {
            session_id: vec![0; 16],
            dst_ip: vec![10, 0, 0],
            dst_port: 53,
            ..Default::default()
        };
        let status = UdpSessionRegistration::try_from(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let request = proto::RegisterUdpSessionRequest {
            session_id: vec![0; 16],
            dst_ip: vec![10, 0, 0, 1],
            dst_port: 70_000,
            ..Default::default()
        };
        assert!(UdpSessionRegistration::try_from(request).is_err());

        let request = proto::RegisterUdpSessionRequest {
            session_id: vec![0; 3],
            dst_ip: vec![10, 0, 0, 1],
            dst_port: 53,
            ..Default::default()
        };
        assert!(UdpSessionRegistration::try_from(request).is_err());
    }
}
