//! Pipeline telemetry: counter and gauge vectors plus their materialisation.
//!
//! Counters are monotone totals reported as deltas between stats ticks;
//! gauges are instantaneous levels reported as-is. Both live in fixed arrays
//! of atomics indexed by enum, shared by every pipeline stage through an
//! `Arc`. All writes use `Relaxed` ordering; these are sampling metrics,
//! not synchronisation.
//!
//! Materialised values are re-injected into the ingress queue as synthetic
//! samples under `server.hadrianus.<hostname>.<name>`, which the built-in
//! override rule passes through the filter unmodified.

use std::sync::atomic::{AtomicI64, Ordering::Relaxed};
use std::sync::Arc;

use crate::message::{unix_now, MetricMessage};
use crate::queue::IngressSender;

/// Metric path prefix for the relay's own telemetry.
pub const INTERNAL_METRIC_PREFIX: &str = "server.hadrianus.";

// ---------------------------------------------------------------------------
// Counter / gauge enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    CleanupTimeMilli,
    ClientConnectionClosing,
    ClientConnectionOpening,
    DiscardedChattyMessage,
    DiscardedStaleAndChattyMessage,
    DiscardedStaleMessage,
    DroppedIncomingMessages,
    DroppedOutPool,
    DroppedOutConnection,
    GarbageCollectionPauseMs,
    GarbageCollections,
    IncomingMessageOverflows,
    InvalidMessage,
    ReceivedMessage,
    SentMessage,
    ToOutConnectionOverflows,
    ToOutPoolOverflows,
}

impl Counter {
    pub const ALL: [Counter; 17] = [
        Counter::CleanupTimeMilli,
        Counter::ClientConnectionClosing,
        Counter::ClientConnectionOpening,
        Counter::DiscardedChattyMessage,
        Counter::DiscardedStaleAndChattyMessage,
        Counter::DiscardedStaleMessage,
        Counter::DroppedIncomingMessages,
        Counter::DroppedOutPool,
        Counter::DroppedOutConnection,
        Counter::GarbageCollectionPauseMs,
        Counter::GarbageCollections,
        Counter::IncomingMessageOverflows,
        Counter::InvalidMessage,
        Counter::ReceivedMessage,
        Counter::SentMessage,
        Counter::ToOutConnectionOverflows,
        Counter::ToOutPoolOverflows,
    ];

    /// The externally emitted metric name.
    pub fn name(self) -> &'static str {
        match self {
            Counter::CleanupTimeMilli => "cleanupTimeMilli",
            Counter::ClientConnectionClosing => "clientConnectionClosing",
            Counter::ClientConnectionOpening => "clientConnectionOpening",
            Counter::DiscardedChattyMessage => "discardedChattyMessage",
            Counter::DiscardedStaleAndChattyMessage => "discardedStaleAndChattyMessage",
            Counter::DiscardedStaleMessage => "discardedStaleMessage",
            Counter::DroppedIncomingMessages => "droppedIncomingMessages",
            Counter::DroppedOutPool => "droppedOutPool",
            Counter::DroppedOutConnection => "droppedOutConnection",
            Counter::GarbageCollectionPauseMs => "garbageCollectionPauseMs",
            Counter::GarbageCollections => "garbageCollections",
            Counter::IncomingMessageOverflows => "incomingMessageOverflows",
            Counter::InvalidMessage => "invalidMessage",
            Counter::ReceivedMessage => "receivedMessage",
            Counter::SentMessage => "sentMessage",
            Counter::ToOutConnectionOverflows => "toOutConnectionOverflows",
            Counter::ToOutPoolOverflows => "toOutPoolOverflows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gauge {
    AllocatedMemoryMegabytes,
    ClientConnectionsActive,
    EncounteredMetricPaths,
    Goroutines,
    StaleMetricPaths,
}

impl Gauge {
    pub const ALL: [Gauge; 5] = [
        Gauge::AllocatedMemoryMegabytes,
        Gauge::ClientConnectionsActive,
        Gauge::EncounteredMetricPaths,
        Gauge::Goroutines,
        Gauge::StaleMetricPaths,
    ];

    /// The externally emitted metric name.
    pub fn name(self) -> &'static str {
        match self {
            Gauge::AllocatedMemoryMegabytes => "allocatedMemoryMegabytes",
            Gauge::ClientConnectionsActive => "clientConnectionsActive",
            Gauge::EncounteredMetricPaths => "encounteredMetricPaths",
            Gauge::Goroutines => "goroutines",
            Gauge::StaleMetricPaths => "staleMetricPaths",
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Shared counter and gauge vectors, one atomic slot per enum variant.
pub struct Stats {
    counters: [AtomicI64; Counter::ALL.len()],
    gauges: [AtomicI64; Gauge::ALL.len()],
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: std::array::from_fn(|_| AtomicI64::new(0)),
            gauges: std::array::from_fn(|_| AtomicI64::new(0)),
        })
    }

    pub fn inc(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Relaxed);
    }

    pub fn add(&self, counter: Counter, amount: i64) {
        self.counters[counter as usize].fetch_add(amount, Relaxed);
    }

    pub fn counter(&self, counter: Counter) -> i64 {
        self.counters[counter as usize].load(Relaxed)
    }

    pub fn inc_gauge(&self, gauge: Gauge) {
        self.gauges[gauge as usize].fetch_add(1, Relaxed);
    }

    pub fn dec_gauge(&self, gauge: Gauge) {
        self.gauges[gauge as usize].fetch_sub(1, Relaxed);
    }

    pub fn set_gauge(&self, gauge: Gauge, level: i64) {
        self.gauges[gauge as usize].store(level, Relaxed);
    }

    pub fn gauge(&self, gauge: Gauge) -> i64 {
        self.gauges[gauge as usize].load(Relaxed)
    }
}

// ---------------------------------------------------------------------------
// StatsEmitter
// ---------------------------------------------------------------------------

/// Turns the shared vectors into synthetic ingress samples on each stats
/// tick. Counters are delta-reported against the previous snapshot; a counter
/// that has never fired is not emitted at all, and its first emission is the
/// absolute total. Gauges are level-reported unconditionally.
pub struct StatsEmitter {
    counter_paths: Vec<String>,
    gauge_paths: Vec<String>,
    previous: [i64; Counter::ALL.len()],
}

impl StatsEmitter {
    /// Builds the full external metric paths once, with the hostname
    /// resolved at startup.
    pub fn new(hostname: &str) -> Self {
        let counter_paths = Counter::ALL
            .iter()
            .map(|c| format!("{}{}.{}", INTERNAL_METRIC_PREFIX, hostname, c.name()))
            .collect();
        let gauge_paths = Gauge::ALL
            .iter()
            .map(|g| format!("{}{}.{}", INTERNAL_METRIC_PREFIX, hostname, g.name()))
            .collect();
        Self {
            counter_paths,
            gauge_paths,
            previous: [0; Counter::ALL.len()],
        }
    }

    pub fn emit(&mut self, stats: &Stats, ingress: &IngressSender) {
        let timestamp = unix_now();

        for (index, counter) in Counter::ALL.iter().enumerate() {
            let current = stats.counter(*counter);
            let previous = self.previous[index];
            if previous > 0 {
                ingress.send(MetricMessage {
                    path: self.counter_paths[index].clone(),
                    value: (current - previous) as f64,
                    timestamp,
                });
            } else if current > 0 {
                // First time this counter fires: no snapshot to compare
                // with, output the running total.
                ingress.send(MetricMessage {
                    path: self.counter_paths[index].clone(),
                    value: current as f64,
                    timestamp,
                });
            }
            self.previous[index] = current;
        }

        for (index, gauge) in Gauge::ALL.iter().enumerate() {
            ingress.send(MetricMessage {
                path: self.gauge_paths[index].clone(),
                value: stats.gauge(*gauge) as f64,
                timestamp,
            });
        }
    }
}
