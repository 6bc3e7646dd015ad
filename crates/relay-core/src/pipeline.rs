//! Actor wiring: queues, threads, periodic tickers, and the supervisor feed.
//!
//! `start` assembles the whole relay: acceptor and client readers feed the
//! ingress queue, the filter actor feeds the pool queue, the dispatcher fans
//! out to per-connection writers. The stats tick samples the runtime probes
//! and re-injects the telemetry vectors into ingress; the cleanup tick arms
//! the filter's eviction scan. Fatal runtime conditions are delivered on the
//! returned channel so one place (the caller) decides process exit.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, tick, Receiver};

use crate::config::{RelaySettings, TCP_NO_DELAY};
use crate::egress::{spawn_egress, Destination};
use crate::filter::MetricFilter;
use crate::ingress::spawn_acceptor;
use crate::overrides::OverrideSet;
use crate::probes;
use crate::queue::{FlowControl, IngressSender, PoolSender, INGRESS_QUEUE_SIZE, POOL_QUEUE_SIZE};
use crate::stats::{Gauge, Stats, StatsEmitter};

/// A fatal condition reported by a pipeline task. The supervisor logs it and
/// exits non-zero.
pub struct FatalError {
    pub task: &'static str,
    pub error: anyhow::Error,
}

/// Spawn every pipeline task and return the supervisor channel. The daemon
/// runs until a fatal event arrives; there is no orderly shutdown path.
pub fn start(
    listener: TcpListener,
    clusters: Vec<Vec<Destination>>,
    overrides: OverrideSet,
    settings: RelaySettings,
    hostname: String,
) -> Receiver<FatalError> {
    let stats = Stats::new();
    let flow = FlowControl::new();
    let (fatal_tx, fatal_rx) = bounded(1);
    let (ingress_tx, ingress_rx) = bounded(INGRESS_QUEUE_SIZE);
    let (pool_tx, pool_rx) = bounded(POOL_QUEUE_SIZE);
    let ingress = IngressSender::new(ingress_tx, stats.clone(), flow.clone());
    let pool = PoolSender::new(pool_tx, stats.clone(), flow.clone());

    spawn_acceptor(listener, ingress.clone(), stats.clone(), fatal_tx);
    spawn_egress(&clusters, TCP_NO_DELAY, &stats, &flow, pool_rx);

    let cleanup_flag = Arc::new(AtomicBool::new(false));

    let filter = MetricFilter::new(settings.clone(), overrides, stats.clone());
    let filter_cleanup_flag = cleanup_flag.clone();
    std::thread::Builder::new()
        .name("filter".into())
        .spawn(move || filter.run(ingress_rx, pool, filter_cleanup_flag))
        .expect("failed to spawn filter");

    let stats_interval = Duration::from_secs(settings.stats_time_granularity.max(1) as u64);
    let stats_tick = stats.clone();
    std::thread::Builder::new()
        .name("stats-tick".into())
        .spawn(move || {
            let mut emitter = StatsEmitter::new(&hostname);
            for _ in tick(stats_interval).iter() {
                stats_tick.set_gauge(
                    Gauge::AllocatedMemoryMegabytes,
                    probes::resident_memory_megabytes(),
                );
                stats_tick.set_gauge(Gauge::Goroutines, probes::live_threads());
                emitter.emit(&stats_tick, &ingress);
            }
        })
        .expect("failed to spawn stats tick");

    let cleanup_interval = Duration::from_secs(settings.cleanup_time_granularity.max(1) as u64);
    std::thread::Builder::new()
        .name("cleanup-tick".into())
        .spawn(move || {
            for _ in tick(cleanup_interval).iter() {
                cleanup_flag.store(true, Relaxed);
            }
        })
        .expect("failed to spawn cleanup tick");

    fatal_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{Ipv4Addr, TcpStream};
    use std::time::Duration;

    /// End-to-end over loopback: two clients in, one cluster of one
    /// destination out, chatty duplicates filtered on the way.
    #[test]
    fn test_relay_end_to_end() {
        let downstream = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let downstream_addr = downstream.local_addr().unwrap();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let ingress_addr = listener.local_addr().unwrap();

        let clusters = vec![vec![Destination {
            host: downstream_addr.ip().to_string(),
            port: downstream_addr.port(),
        }]];
        let settings = RelaySettings {
            initial_metrics_enabled: true,
            // Long tick intervals keep synthetic telemetry out of this test.
            stats_time_granularity: 3600,
            cleanup_time_granularity: 3600,
            ..RelaySettings::default()
        };
        let _fatal_rx = start(
            listener,
            clusters,
            OverrideSet::new(Vec::new()),
            settings,
            "testhost".into(),
        );

        let mut client = TcpStream::connect(ingress_addr).unwrap();
        client
            .write_all(b"web.requests 5 1000\nweb.requests 5 1004\nweb.latency 9 1000\n")
            .unwrap();
        drop(client);

        let (socket, _) = downstream.accept().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(socket);
        let mut lines = Vec::new();
        for _ in 0..2 {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            lines.push(line.trim().to_string());
        }
        // The second web.requests sample is chatty and never leaves.
        assert_eq!(lines, vec!["web.requests 5 1000", "web.latency 9 1000"]);
    }
}
