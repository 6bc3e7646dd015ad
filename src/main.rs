//! hadrianus, a Graphite plaintext metrics relay.
//!
//! Accepts many concurrent TCP clients pushing `metric_path value timestamp`
//! lines, filters them by staleness and rate-limit policy, and fans the
//! survivors out to one or more downstream Graphite clusters over persistent
//! load-balanced connections. Its own operational telemetry is injected into
//! the same output stream as synthetic metrics.

use std::net::{Ipv4Addr, TcpListener};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;
use relay_core::{config::RelaySettings, egress, overrides, pipeline, probes};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let settings = RelaySettings {
        initial_metrics_enabled: cli.enable_new_metrics,
        minimum_time_interval: cli.minimum_time_interval,
        stats_time_granularity: cli.stats_time_granularity,
        max_consecutive_dry_messages: cli.max_dry_messages,
        max_dry_limit: cli.max_dry_limit,
        stale_resend_interval: cli.stale_resend_interval,
        cleanup_time_granularity: cli.cleanup_time_granularity,
        cleanup_max_age: cli.cleanup_max_age,
    };
    if settings.stats_time_granularity < 1 || settings.cleanup_time_granularity < 1 {
        anyhow::bail!("time granularities must be at least one second");
    }

    // Validate and resolve every destination before anything starts.
    let mut clusters = Vec::new();
    clusters.push(egress::parse_cluster(&cli.destination).context("primary destination")?);
    for (flag, raw) in [
        ("mirror destination", &cli.mirror_destination),
        ("tertiary destination", &cli.tertiary_destination),
    ] {
        if !raw.is_empty() {
            let nodes: Vec<String> = raw.split(' ').map(String::from).collect();
            clusters.push(egress::parse_cluster(&nodes).context(flag)?);
        }
    }

    let rules = match &cli.override_file {
        Some(path) => overrides::load_override_file(path).context("override file")?,
        None => Vec::new(),
    };
    let override_set = overrides::OverrideSet::new(rules);

    let hostname = probes::hostname().context("failed to resolve hostname")?;

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, cli.listening_port))
        .with_context(|| format!("failed to bind TCPv4 port {}", cli.listening_port))?;

    tracing::info!(
        port = cli.listening_port,
        clusters = clusters.len(),
        "hadrianus listening"
    );

    let fatal_rx = pipeline::start(listener, clusters, override_set, settings, hostname);

    // The daemon never exits cleanly; the first fatal event decides the exit.
    match fatal_rx.recv() {
        Ok(fatal) => {
            tracing::error!(task = fatal.task, error = %fatal.error, "fatal pipeline error");
            Err(fatal.error.context(format!("fatal error in {}", fatal.task)))
        }
        Err(_) => anyhow::bail!("pipeline supervisor channel closed unexpectedly"),
    }
}
