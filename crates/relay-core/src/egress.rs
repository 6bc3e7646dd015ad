//! Egress: destination parsing, per-cluster round-robin dispatch, and the
//! persistent connection writers.
//!
//! Every sample surviving the filter is copied to each configured cluster;
//! within a cluster it lands on exactly one destination, chosen round-robin
//! by arrival count. Each destination gets its own bounded queue and writer
//! thread holding one persistent TCP connection.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use regex::Regex;
use thiserror::Error;

use crate::message::MetricMessage;
use crate::queue::{ConnSender, FlowControl, CONNECTION_QUEUE_SIZE};
use crate::stats::Stats;

const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(250);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("invalid host:port supplied: {0:?}")]
    BadSyntax(String),
    #[error("port number too big: {0:?}")]
    PortTooBig(String),
    #[error("invalid hostname: {0:?}")]
    Unresolvable(String),
}

/// One downstream receiver. Accepted spellings are `port`, `:port` and
/// `host:port`; a blank host means the local host. The hostname must resolve
/// at startup, though the connection itself is made (and remade) later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn parse(raw: &str) -> Result<Self, DestinationError> {
        let host_port_pattern =
            Regex::new(r"^(?:([a-z0-9][a-z0-9.-]*)?:)?(\d+)$").expect("host:port pattern compiles");
        let lowered = raw.to_lowercase();
        let caps = host_port_pattern
            .captures(&lowered)
            .ok_or_else(|| DestinationError::BadSyntax(raw.to_string()))?;

        let host = match caps.get(1) {
            Some(host) if !host.as_str().is_empty() => host.as_str().to_string(),
            _ => "127.0.0.1".to_string(),
        };
        let port: u16 = caps[2]
            .parse::<u64>()
            .ok()
            .filter(|&p| p <= 65535)
            .ok_or_else(|| DestinationError::PortTooBig(caps[2].to_string()))?
            as u16;

        match (host.as_str(), port).to_socket_addrs() {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    Ok(Self { host, port })
                } else {
                    Err(DestinationError::Unresolvable(host))
                }
            }
            _ => Err(DestinationError::Unresolvable(host)),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse and resolve one cluster's worth of destination arguments.
pub fn parse_cluster(raws: &[String]) -> Result<Vec<Destination>, DestinationError> {
    raws.iter().map(|raw| Destination::parse(raw)).collect()
}

// ---------------------------------------------------------------------------
// Pool dispatcher
// ---------------------------------------------------------------------------

/// Fans each pool sample out to every cluster, round-robin inside each.
pub struct PoolDispatcher {
    clusters: Vec<Vec<ConnSender>>,
    messages_sent: u64,
}

impl PoolDispatcher {
    pub fn new(clusters: Vec<Vec<ConnSender>>) -> Self {
        Self {
            clusters,
            messages_sent: 0,
        }
    }

    pub fn route(&mut self, msg: MetricMessage) {
        for cluster in &self.clusters {
            let index = (self.messages_sent % cluster.len() as u64) as usize;
            cluster[index].send(msg.clone());
        }
        self.messages_sent += 1;
    }

    pub fn run(mut self, pool_rx: Receiver<MetricMessage>) {
        for msg in pool_rx.iter() {
            self.route(msg);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection writers
// ---------------------------------------------------------------------------

/// Owns one downstream connection and its input queue. Write and connect
/// failures are retried with capped exponential backoff instead of being
/// fatal; the sample in hand is written after reconnecting, so losses occur
/// only at the bounded queue in front of this writer.
pub struct ConnectionWriter {
    destination: Destination,
    tcp_no_delay: bool,
}

impl ConnectionWriter {
    pub fn new(destination: Destination, tcp_no_delay: bool) -> Self {
        Self {
            destination,
            tcp_no_delay,
        }
    }

    fn connect_with_backoff(&self) -> TcpStream {
        let mut backoff = RECONNECT_BACKOFF_MIN;
        loop {
            match TcpStream::connect(self.destination.addr()) {
                Ok(stream) => {
                    if let Err(error) = stream.set_nodelay(self.tcp_no_delay) {
                        tracing::warn!(dest = %self.destination.addr(), %error,
                            "failed to set nodelay");
                    }
                    tracing::info!(dest = %self.destination.addr(), "connected");
                    return stream;
                }
                Err(error) => {
                    tracing::warn!(dest = %self.destination.addr(), %error,
                        "connect failed, retrying in {:?}", backoff);
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                }
            }
        }
    }

    pub fn run(self, rx: Receiver<MetricMessage>) {
        let mut stream = self.connect_with_backoff();
        for msg in rx.iter() {
            let line = msg.wire_line();
            while let Err(error) = stream.write_all(line.as_bytes()) {
                tracing::warn!(dest = %self.destination.addr(), %error,
                    "write failed, reconnecting");
                stream = self.connect_with_backoff();
            }
        }
    }
}

/// Build the per-connection queues and spawn the writers plus the
/// dispatcher feeding them from the pool queue.
pub fn spawn_egress(
    clusters: &[Vec<Destination>],
    tcp_no_delay: bool,
    stats: &Arc<Stats>,
    flow: &Arc<FlowControl>,
    pool_rx: Receiver<MetricMessage>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let mut senders: Vec<Vec<ConnSender>> = Vec::new();

    for (cluster_index, cluster) in clusters.iter().enumerate() {
        let mut cluster_senders = Vec::new();
        for (conn_index, destination) in cluster.iter().enumerate() {
            let (tx, rx) = bounded(CONNECTION_QUEUE_SIZE);
            cluster_senders.push(ConnSender::new(tx, stats.clone(), flow.clone()));

            let writer = ConnectionWriter::new(destination.clone(), tcp_no_delay);
            let handle = std::thread::Builder::new()
                .name(format!("out-{cluster_index}-{conn_index}"))
                .spawn(move || writer.run(rx))
                .expect("failed to spawn connection writer");
            handles.push(handle);
        }
        senders.push(cluster_senders);
    }

    let dispatcher = PoolDispatcher::new(senders);
    let handle = std::thread::Builder::new()
        .name("out-pool".into())
        .spawn(move || dispatcher.run(pool_rx))
        .expect("failed to spawn pool dispatcher");
    handles.push(handle);

    handles
}
