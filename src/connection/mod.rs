//! Lifecycle events published by the layer that owns the physical tunnel connections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport protocol a tunnel connection was established with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http2,
    Quic,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http2 => "http2",
            Protocol::Quic => "quic",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tunnel protocol '{0}'")]
pub struct UnknownProtocolName(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocolName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http2" => Ok(Protocol::Http2),
            "quic" => Ok(Protocol::Quic),
            _ => Err(UnknownProtocolName(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Disconnected,
    Connected,
    Reconnecting,
    SetUrl,
    RegisteringTunnel,
    Unregistering,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Disconnected => "disconnected",
            EventType::Connected => "connected",
            EventType::Reconnecting => "reconnecting",
            EventType::SetUrl => "set_url",
            EventType::RegisteringTunnel => "registering_tunnel",
            EventType::Unregistering => "unregistering",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change of the connection in slot `index`.
///
/// `protocol` is only meaningful for [`EventType::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub index: u8,
    pub event_type: EventType,
    pub protocol: Protocol,
}

impl Event {
    pub fn new(index: u8, event_type: EventType) -> Self {
        Self {
            index,
            event_type,
            protocol: Protocol::default(),
        }
    }

    pub fn connected(index: u8, protocol: Protocol) -> Self {
        Self {
            index,
            event_type: EventType::Connected,
            protocol,
        }
    }
}

/// Anything that wants to observe connection lifecycle events.
pub trait EventSink: Send + Sync {
    fn on_tunnel_event(&self, event: Event);
}
