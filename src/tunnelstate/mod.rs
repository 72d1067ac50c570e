//! Tracks the lifecycle of every tunnel connection slot.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::connection::{Event, EventSink, EventType, Protocol};
use crate::metrics::TunnelMetrics;
use crate::state_machine::StateMachine;

/// Last known state of one connection slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub is_connected: bool,
    /// Protocol of the most recent successful connection in this slot, kept across disconnects.
    pub protocol: Option<Protocol>,
}

/// An event the table has no transition for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrecognizedEvent(pub Event);

/// Pure table of connection slots, driven by lifecycle events.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<u8, ConnectionInfo>,
    unrecognized: VecDeque<UnrecognizedEvent>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect(&mut self, index: u8, protocol: Protocol) {
        self.connections.insert(
            index,
            ConnectionInfo {
                is_connected: true,
                protocol: Some(protocol),
            },
        );
    }

    /// Marks `index` as down, creating the slot if it was never seen.
    fn disconnect(&mut self, index: u8) {
        self.connections.entry(index).or_default().is_connected = false;
    }

    pub fn get(&self, index: u8) -> Option<ConnectionInfo> {
        self.connections.get(&index).copied()
    }

    pub fn count_active_connections(&self) -> usize {
        self.connections
            .values()
            .filter(|info| info.is_connected)
            .count()
    }

    pub fn has_connected_with(&self, protocol: Protocol) -> bool {
        self.connections
            .values()
            .any(|info| info.protocol == Some(protocol))
    }
}

impl StateMachine for ConnectionTable {
    type Input = Event;
    type Output = UnrecognizedEvent;

    fn process_input(&mut self, event: Event) {
        match event.event_type {
            EventType::Connected => self.connect(event.index, event.protocol),
            EventType::Disconnected
            | EventType::Reconnecting
            | EventType::RegisteringTunnel
            | EventType::Unregistering => self.disconnect(event.index),
            EventType::SetUrl => self.unrecognized.push_back(UnrecognizedEvent(event)),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.unrecognized.pop_front()
    }
}

/// Shares a [`ConnectionTable`] between the connection owners reporting events and the
/// readiness checks reading it.
///
/// Events are applied under the write lock; queries take the read lock and scan every slot.
#[derive(Debug)]
pub struct ConnTracker {
    table: RwLock<ConnectionTable>,
    metrics: Arc<TunnelMetrics>,
}

impl ConnTracker {
    pub fn new(metrics: Arc<TunnelMetrics>) -> Self {
        Self {
            table: RwLock::new(ConnectionTable::new()),
            metrics,
        }
    }

    pub fn on_tunnel_event(&self, event: Event) {
        self.metrics.record_event(event.event_type);

        let unrecognized: Vec<UnrecognizedEvent> = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            table.process_input(event);
            std::iter::from_fn(|| table.poll_output()).collect()
        };

        for UnrecognizedEvent(event) in unrecognized {
            error!(
                slot = event.index,
                event = %event.event_type,
                "Unknown connection event"
            );
        }

        debug!(slot = event.index, event = %event.event_type, "Connection event applied");
    }

    pub fn count_active_connections(&self) -> usize {
        self.read().count_active_connections()
    }

    /// Whether any slot has ever connected with `protocol`, whatever its state now.
    pub fn has_connected_with(&self, protocol: Protocol) -> bool {
        self.read().has_connected_with(protocol)
    }

    pub fn connection(&self, index: u8) -> Option<ConnectionInfo> {
        self.read().get(index)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ConnectionTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for ConnTracker {
    fn on_tunnel_event(&self, event: Event) {
        ConnTracker::on_tunnel_event(self, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ConnTracker {
        ConnTracker::new(Arc::new(TunnelMetrics::new()))
    }

    #[test]
    fn test_connection_table_transitions() {
        let mut table = ConnectionTable::new();

        table.process_input(Event::connected(0, Protocol::Quic));
        assert_eq!(
            table.get(0),
            Some(ConnectionInfo {
                is_connected: true,
                protocol: Some(Protocol::Quic),
            })
        );

        table.process_input(Event::new(0, EventType::Reconnecting));
        assert_eq!(
            table.get(0),
            Some(ConnectionInfo {
                is_connected: false,
                protocol: Some(Protocol::Quic),
            })
        );
        assert!(table.has_connected_with(Protocol::Quic));

        table.process_input(Event::new(3, EventType::Disconnected));
        assert_eq!(table.get(3), Some(ConnectionInfo::default()));
        assert!(!table.has_connected_with(Protocol::Http2));
        assert!(table.poll_output().is_none());
    }

    #[test]
    fn test_unrecognized_event_changes_nothing() {
        let mut table = ConnectionTable::new();
        table.process_input(Event::connected(1, Protocol::Http2));

        let set_url = Event::new(1, EventType::SetUrl);
        table.process_input(set_url);

        assert_eq!(table.poll_output(), Some(UnrecognizedEvent(set_url)));
        assert!(table.poll_output().is_none());
        assert_eq!(table.count_active_connections(), 1);
        assert!(table.get(2).is_none());
    }

    #[test]
    fn test_active_count_follows_events() {
        let tracker = tracker();
        assert_eq!(tracker.count_active_connections(), 0);

        tracker.on_tunnel_event(Event::connected(1, Protocol::Http2));
        assert_eq!(tracker.count_active_connections(), 1);

        tracker.on_tunnel_event(Event::connected(2, Protocol::Http2));
        assert_eq!(tracker.count_active_connections(), 2);

        tracker.on_tunnel_event(Event::new(2, EventType::Reconnecting));
        assert_eq!(tracker.count_active_connections(), 1);

        tracker.on_tunnel_event(Event::new(1, EventType::RegisteringTunnel));
        assert_eq!(tracker.count_active_connections(), 0);

        tracker.on_tunnel_event(Event::connected(1, Protocol::Http2));
        assert_eq!(tracker.count_active_connections(), 1);

        tracker.on_tunnel_event(Event::new(1, EventType::Unregistering));
        assert_eq!(tracker.count_active_connections(), 0);

        tracker.on_tunnel_event(Event::new(1, EventType::Disconnected));
        assert_eq!(tracker.count_active_connections(), 0);
        assert!(tracker.has_connected_with(Protocol::Http2));
        assert!(!tracker.has_connected_with(Protocol::Quic));
    }

    #[test]
    fn test_events_are_counted() {
        let metrics = Arc::new(TunnelMetrics::new());
        let tracker = ConnTracker::new(Arc::clone(&metrics));

        tracker.on_tunnel_event(Event::connected(0, Protocol::Quic));
        tracker.on_tunnel_event(Event::new(0, EventType::SetUrl));
        tracker.on_tunnel_event(Event::new(0, EventType::SetUrl));

        assert_eq!(metrics.event_count(EventType::Connected), 1);
        assert_eq!(metrics.event_count(EventType::SetUrl), 2);
        assert_eq!(metrics.event_count(EventType::Disconnected), 0);
    }

    #[test]
    fn test_concurrent_events_and_queries() {
        let tracker = Arc::new(tracker());

        let writers: Vec<_> = (0..8u8)
            .map(|index| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.on_tunnel_event(Event::connected(index, Protocol::Quic));
                        tracker.on_tunnel_event(Event::new(index, EventType::Reconnecting));
                    }
                    // Odd slots end up disconnected, even slots connected.
                    let last = if index % 2 == 0 {
                        Event::connected(index, Protocol::Quic)
                    } else {
                        Event::new(index, EventType::Disconnected)
                    };
                    tracker.on_tunnel_event(last);
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(tracker.count_active_connections() <= 8);
                        tracker.has_connected_with(Protocol::Quic);
                        tracker.has_connected_with(Protocol::Http2);
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(tracker.count_active_connections(), 4);
        assert!(tracker.has_connected_with(Protocol::Quic));
        assert!(!tracker.has_connected_with(Protocol::Http2));
        for index in 0..8u8 {
            let info = tracker.connection(index).unwrap();
            assert_eq!(info.is_connected, index % 2 == 0);
            assert_eq!(info.protocol, Some(Protocol::Quic));
        }
    }
}
