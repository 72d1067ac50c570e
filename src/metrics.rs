//! Process wide counters for RPC calls and connection lifecycle events.
//!
//! A single [`TunnelMetrics`] is created at startup, before any connection is opened, and shared
//! by `Arc` with every RPC client, RPC server and the connection tracker. It is never
//! re-initialized and every recording method takes `&self`, so any task may record at any time.
//! Exporting is left to whoever owns the sink; [`TunnelMetrics::render_prometheus`] produces the
//! text exposition format for that purpose.

use std::fmt::{self, Write};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::connection::EventType;

const NAMESPACE: &str = "tunnellink";
const HANDLER: &str = "tunnellink";

/// Upper bounds of the latency histogram buckets, in milliseconds.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [1, 10, 25, 50, 100, 500, 1000, 5000];

const ROLES: [Role; 2] = [Role::Client, Role::Server];
const OPERATIONS: [Operation; 3] = [
    Operation::RegisterUdpSession,
    Operation::UnregisterUdpSession,
    Operation::UpdateConfiguration,
];
const EVENT_TYPES: [EventType; 6] = [
    EventType::Disconnected,
    EventType::Connected,
    EventType::Reconnecting,
    EventType::SetUrl,
    EventType::RegisteringTunnel,
    EventType::Unregistering,
];

/// Which side of an RPC connection recorded a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// The RPC operations of the session and configuration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RegisterUdpSession,
    UnregisterUdpSession,
    UpdateConfiguration,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::RegisterUdpSession => "register_udp_session",
            Operation::UnregisterUdpSession => "unregister_udp_session",
            Operation::UpdateConfiguration => "update_configuration",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct OperationStats {
    calls: u64,
    failures: u64,
    latency_sum: Duration,
    // One slot per bucket plus the +Inf overflow, not cumulative.
    latency_buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
}

impl OperationStats {
    fn observe(&mut self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());

        self.calls += 1;
        self.latency_sum += elapsed;
        self.latency_buckets[bucket] += 1;
    }
}

/// A point in time copy of the counters of one `(role, operation)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub latency_sum: Duration,
}

#[derive(Debug, Default)]
pub struct TunnelMetrics {
    operations: DashMap<(Role, Operation), OperationStats, ahash::RandomState>,
    events: DashMap<EventType, u64, ahash::RandomState>,
}

impl TunnelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing one call attempt.
    ///
    /// The call count and the latency observation are recorded when the returned timer drops,
    /// whatever the outcome of the call.
    pub fn start_timer(&self, role: Role, operation: Operation) -> OperationTimer<'_> {
        OperationTimer {
            metrics: self,
            role,
            operation,
            started: Instant::now(),
        }
    }

    pub fn record_failure(&self, role: Role, operation: Operation) {
        self.operations
            .entry((role, operation))
            .or_default()
            .failures += 1;
    }

    pub fn record_event(&self, event_type: EventType) {
        *self.events.entry(event_type).or_default() += 1;
    }

    pub fn operation(&self, role: Role, operation: Operation) -> OperationSnapshot {
        self.operations
            .get(&(role, operation))
            .map(|stats| OperationSnapshot {
                calls: stats.calls,
                failures: stats.failures,
                latency_sum: stats.latency_sum,
            })
            .unwrap_or_default()
    }

    pub fn event_count(&self, event_type: EventType) -> u64 {
        self.events.get(&event_type).map(|count| *count).unwrap_or(0)
    }

    /// Render every counter in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        for role in ROLES {
            let operations = format!("{NAMESPACE}_rpc_{}_operations_total", role.as_str());
            write_metric_header(
                &mut output,
                &operations,
                "Number of RPC operations by handler and method",
                "counter",
            );
            for operation in OPERATIONS {
                let calls = self.operation(role, operation).calls;
                write_metric_value(&mut output, &operations, &labels(operation), calls);
            }

            let failures = format!("{NAMESPACE}_rpc_{}_failures_total", role.as_str());
            write_metric_header(
                &mut output,
                &failures,
                "Number of failed RPC operations by handler and method",
                "counter",
            );
            for operation in OPERATIONS {
                let count = self.operation(role, operation).failures;
                write_metric_value(&mut output, &failures, &labels(operation), count);
            }

            let latency = format!("{NAMESPACE}_rpc_{}_latency_ms", role.as_str());
            write_metric_header(
                &mut output,
                &latency,
                "Latency of RPC operations by handler and method in milliseconds",
                "histogram",
            );
            for operation in OPERATIONS {
                self.write_histogram(&mut output, &latency, role, operation);
            }
        }

        let events = format!("{NAMESPACE}_tunnel_events_total");
        write_metric_header(
            &mut output,
            &events,
            "Number of connection lifecycle events by type",
            "counter",
        );
        for event_type in EVENT_TYPES {
            write_metric_value(
                &mut output,
                &events,
                &[("event", event_type.as_str())],
                self.event_count(event_type),
            );
        }

        output
    }

    fn write_histogram(&self, output: &mut String, name: &str, role: Role, operation: Operation) {
        let (buckets, sum) = self
            .operations
            .get(&(role, operation))
            .map(|stats| (stats.latency_buckets, stats.latency_sum))
            .unwrap_or_default();

        let bucket_name = format!("{name}_bucket");
        let mut cumulative = 0;
        for (index, count) in buckets.iter().enumerate() {
            cumulative += count;
            let bound = LATENCY_BUCKETS_MS
                .get(index)
                .map_or_else(|| "+Inf".to_string(), u64::to_string);
            let bucket_labels = [
                ("handler", HANDLER),
                ("method", operation.as_str()),
                ("le", bound.as_str()),
            ];
            write_metric_value(output, &bucket_name, &bucket_labels, cumulative);
        }

        let _ = writeln!(
            output,
            "{name}_sum{{handler=\"{HANDLER}\",method=\"{operation}\"}} {}",
            sum.as_secs_f64() * 1000.0
        );
        write_metric_value(output, &format!("{name}_count"), &labels(operation), cumulative);
    }
}

/// Records one call attempt when dropped.
#[must_use = "the call is recorded when the timer is dropped"]
pub struct OperationTimer<'a> {
    metrics: &'a TunnelMetrics,
    role: Role,
    operation: Operation,
    started: Instant,
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .operations
            .entry((self.role, self.operation))
            .or_default()
            .observe(self.started.elapsed());
    }
}

fn labels(operation: Operation) -> [(&'static str, &'static str); 2] {
    [("handler", HANDLER), ("method", operation.as_str())]
}

fn write_metric_header(output: &mut String, name: &str, help: &str, metric_type: &str) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {metric_type}");
}

fn write_metric_value(output: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
    let labels = labels
        .iter()
        .map(|(key, label)| format!("{key}=\"{label}\""))
        .collect::<Vec<_>>()
        .join(",");
    let _ = writeln!(output, "{name}{{{labels}}} {value}");
}
