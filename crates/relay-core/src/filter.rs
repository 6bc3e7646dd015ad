//! The filter core: one actor owning all per-path state.
//!
//! Every sample dequeued from ingress runs the same decision: paths marked
//! allow-unmodified pass straight through; everything else is tracked for
//! staleness (too many consecutive identical values) and chattiness (samples
//! arriving faster than the minimum interval). A stale path is revived by
//! the next value change, which also re-emits the last suppressed sample so
//! the downstream sees the transition edge. The dry threshold widens
//! adaptively so chronically intermittent series are not re-suppressed
//! immediately after reviving.
//!
//! The map is deliberately single-writer: only this actor touches it, so no
//! locking is needed and per-path ordering follows ingress-queue order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;

use crate::config::RelaySettings;
use crate::message::{unix_now, MetricMessage};
use crate::overrides::OverrideSet;
use crate::queue::PoolSender;
use crate::stats::{Counter, Gauge, Stats};

/// Filtering state for one metric path.
struct PathState {
    unchanged_counter: u64,
    last_value: f64,
    last_sent_out: i64,
    last_timestamp: i64,
    /// Current staleness threshold; starts at the configured maximum number
    /// of dry messages and widens adaptively on revival.
    consecutive_dry: u64,
    output_active: bool,
    /// Pass this path through as-is, no matter what.
    allow_unmodified: bool,
}

pub struct MetricFilter {
    settings: RelaySettings,
    overrides: OverrideSet,
    paths: HashMap<String, PathState>,
    stats: Arc<Stats>,
}

impl MetricFilter {
    pub fn new(settings: RelaySettings, overrides: OverrideSet, stats: Arc<Stats>) -> Self {
        Self {
            settings,
            overrides,
            paths: HashMap::new(),
            stats,
        }
    }

    /// Dequeue loop. Runs until the ingress senders are gone; the cleanup
    /// flag is checked between samples so eviction happens on this thread.
    pub fn run(
        mut self,
        ingress_rx: Receiver<MetricMessage>,
        pool: PoolSender,
        cleanup_flag: Arc<AtomicBool>,
    ) {
        for msg in ingress_rx.iter() {
            self.process(msg, &pool);
            if cleanup_flag.swap(false, Relaxed) {
                self.cleanup(unix_now());
            }
        }
    }

    pub fn process(&mut self, msg: MetricMessage, pool: &PoolSender) {
        if !self.paths.contains_key(&msg.path) {
            let state = self.admit(&msg);
            self.paths.insert(msg.path.clone(), state);
        }
        if let Some(state) = self.paths.get_mut(&msg.path) {
            Self::decide(&self.settings, &self.stats, state, &msg, pool);
        }
    }

    /// Initialise state for a newly observed path, including the one-shot
    /// override match.
    fn admit(&self, msg: &MetricMessage) -> PathState {
        self.stats.inc_gauge(Gauge::EncounteredMetricPaths);

        let mut state = PathState {
            unchanged_counter: 0,
            last_value: msg.value,
            // Backdate so the first sample is never chatty against itself.
            last_sent_out: msg.timestamp - self.settings.minimum_time_interval,
            last_timestamp: msg.timestamp,
            consecutive_dry: self.settings.max_consecutive_dry_messages,
            output_active: self.settings.initial_metrics_enabled,
            allow_unmodified: false,
        };
        if !state.output_active {
            self.stats.inc_gauge(Gauge::StaleMetricPaths);
        }

        if let Some(rule) = self.overrides.lookup(&msg.path) {
            if rule.allow_unmodified_active {
                state.allow_unmodified = rule.allow_unmodified;
            }
        }
        state
    }

    fn decide(
        settings: &RelaySettings,
        stats: &Stats,
        state: &mut PathState,
        msg: &MetricMessage,
        pool: &PoolSender,
    ) {
        if state.allow_unmodified {
            pool.send(msg.clone());
            state.last_sent_out = msg.timestamp;
            stats.inc(Counter::SentMessage);
        } else {
            if msg.value == state.last_value {
                state.unchanged_counter += 1;
                if state.output_active && state.unchanged_counter >= state.consecutive_dry {
                    state.output_active = false;
                    stats.inc_gauge(Gauge::StaleMetricPaths);
                }
            } else {
                if !state.output_active {
                    // Revive. Widen the dry threshold to the observed run
                    // length so this series is not immediately re-suppressed.
                    if state.unchanged_counter > state.consecutive_dry {
                        state.consecutive_dry =
                            state.unchanged_counter.min(settings.max_dry_limit);
                    }
                    state.output_active = true;
                    stats.dec_gauge(Gauge::StaleMetricPaths);
                    // Send out the previous silenced sample so the
                    // transition is visible downstream.
                    pool.send(MetricMessage {
                        path: msg.path.clone(),
                        value: state.last_value,
                        timestamp: state.last_timestamp,
                    });
                    stats.inc(Counter::SentMessage);
                }
                state.unchanged_counter = 0;
            }

            let chatty = msg.timestamp < state.last_sent_out + settings.minimum_time_interval;
            let resend_stale = settings.stale_resend_interval > 0
                && msg.timestamp > state.last_sent_out + settings.stale_resend_interval;

            if resend_stale || (state.output_active && !chatty) {
                pool.send(msg.clone());
                state.last_sent_out = msg.timestamp;
                stats.inc(Counter::SentMessage);
            } else if !state.output_active && chatty {
                stats.inc(Counter::DiscardedStaleAndChattyMessage);
            } else if !state.output_active && !chatty {
                stats.inc(Counter::DiscardedStaleMessage);
            } else if state.output_active && chatty {
                stats.inc(Counter::DiscardedChattyMessage);
            }
        }

        state.last_value = msg.value;
        state.last_timestamp = msg.timestamp;
    }

    /// Evict every path whose last sample is at least `cleanup_max_age`
    /// seconds behind `now`, with the matching gauge decrements.
    pub fn cleanup(&mut self, now: i64) {
        let began = Instant::now();
        let stats = &self.stats;
        let max_age = self.settings.cleanup_max_age;
        self.paths.retain(|_, state| {
            if now - state.last_timestamp >= max_age {
                if !state.output_active {
                    stats.dec_gauge(Gauge::StaleMetricPaths);
                }
                stats.dec_gauge(Gauge::EncounteredMetricPaths);
                false
            } else {
                true
            }
        });
        self.stats
            .add(Counter::CleanupTimeMilli, began.elapsed().as_millis() as i64);
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }
}
