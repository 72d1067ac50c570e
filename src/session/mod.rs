pub mod error;

use std::time::Instant;

use dashmap::{DashMap, Entry};
use tonic::Status;
use tracing::{debug, info};
use uuid::Uuid;

use crate::tunnelrpc::capability::{
    RegisterUdpSessionResponse, SessionManager, UdpSessionRegistration,
};

use self::error::{RegisterError, SessionAlreadyRegistered, SessionLimitReached};

#[derive(Debug, Clone)]
pub struct UdpSession {
    pub registration: UdpSessionRegistration,
    pub registered_at: Instant,
}

/// In-process registry of UDP sessions, served as a [`SessionManager`].
///
/// Unregistering an unknown session succeeds, so repeated unregister calls are harmless.
#[derive(Debug, Default)]
pub struct UdpSessionMap {
    sessions: DashMap<Uuid, UdpSession, ahash::RandomState>,
    limit: Option<usize>,
}

impl UdpSessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry refusing new sessions once `limit` are registered.
    ///
    /// The limit is checked before insertion, so concurrent registrations may briefly
    /// exceed it.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            sessions: DashMap::default(),
            limit: Some(limit),
        }
    }

    pub fn register(&self, registration: UdpSessionRegistration) -> Result<(), RegisterError> {
        if let Some(limit) = self.limit.filter(|limit| self.sessions.len() >= *limit) {
            return Err(SessionLimitReached { limit }.into());
        }

        match self.sessions.entry(registration.session_id) {
            Entry::Occupied(entry) => Err(SessionAlreadyRegistered {
                session_id: *entry.key(),
            }
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(UdpSession {
                    registration,
                    registered_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    /// Remove a session, returning it if it was registered.
    pub fn unregister(&self, session_id: &Uuid) -> Option<UdpSession> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    pub fn get(&self, session_id: &Uuid) -> Option<UdpSession> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn is_registered(&self, session_id: &Uuid) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[tonic::async_trait]
impl SessionManager for UdpSessionMap {
    async fn register_udp_session(
        &self,
        registration: UdpSessionRegistration,
    ) -> Result<RegisterUdpSessionResponse, Status> {
        let session_id = registration.session_id;
        let (dst_ip, dst_port) = (registration.dst_ip, registration.dst_port);

        self.register(registration).map_err(|err| match err {
            RegisterError::AlreadyRegistered(err) => Status::already_exists(err.to_string()),
            RegisterError::LimitReached(err) => Status::resource_exhausted(err.to_string()),
        })?;

        info!(
            session_id = %session_id,
            dst_ip = %dst_ip,
            dst_port,
            "UDP session registered"
        );
        Ok(RegisterUdpSessionResponse::default())
    }

    async fn unregister_udp_session(
        &self,
        session_id: Uuid,
        message: String,
    ) -> Result<(), Status> {
        match self.unregister(&session_id) {
            Some(_) => info!(session_id = %session_id, message = %message, "UDP session unregistered"),
            None => debug!(session_id = %session_id, "Unregister for unknown UDP session"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn registration(session_id: Uuid) -> UdpSessionRegistration {
        UdpSessionRegistration::builder()
            .session_id(session_id)
            .dst_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .dst_port(53)
            .build()
    }

    #[test]
    fn test_register_session() {
        let map = UdpSessionMap::new();
        let session_id = Uuid::new_v4();

        map.register(registration(session_id)).unwrap();
        assert!(map.is_registered(&session_id));
        assert_eq!(map.active_session_count(), 1);
        assert_eq!(map.get(&session_id).unwrap().registration.dst_port, 53);
    }

    #[test]
    fn test_duplicate_session_error() {
        let map = UdpSessionMap::new();
        let session_id = Uuid::new_v4();

        map.register(registration(session_id)).unwrap();

        let result = map.register(registration(session_id));
        assert!(matches!(result, Err(RegisterError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_limit_reached() {
        let map = UdpSessionMap::with_limit(1);
        map.register(registration(Uuid::new_v4())).unwrap();

        let result = map.register(registration(Uuid::new_v4()));
        assert!(matches!(
            result,
            Err(RegisterError::LimitReached(SessionLimitReached { limit: 1 }))
        ));
    }

    #[test]
    fn test_reregister_after_unregister() {
        let map = UdpSessionMap::new();
        let session_id = Uuid::new_v4();

        map.register(registration(session_id)).unwrap();
        assert!(map.unregister(&session_id).is_some());
        assert!(map.unregister(&session_id).is_none());

        assert!(map.register(registration(session_id)).is_ok());
    }

    #[tokio::test]
    async fn test_unregister_unknown_session_is_ok() {
        let map = UdpSessionMap::new();
        map.unregister_udp_session(Uuid::new_v4(), "gone".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejections_map_to_status_codes() {
        let map = UdpSessionMap::new();
        let session_id = Uuid::new_v4();
        map.register_udp_session(registration(session_id)).await.unwrap();

        let duplicate = map
            .register_udp_session(registration(session_id))
            .await
            .unwrap_err();
        assert_eq!(duplicate.code(), tonic::Code::AlreadyExists);

        let full = UdpSessionMap::with_limit(0);
        let exhausted = full
            .register_udp_session(registration(session_id))
            .await
            .unwrap_err();
        assert_eq!(exhausted.code(), tonic::Code::ResourceExhausted);
    }
}
