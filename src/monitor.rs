//! Producer liveness monitor
//!
//! Every `interval` the monitor snapshots each stream's sequence index, waits
//! `sample_window`, and reads it again. An unchanged index marks the input as
//! down; a changed one marks it up. Live and proxy streams are both sampled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::registry::{ProxyRegistry, StreamRegistry};

/// Liveness monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between samples
    pub interval: Duration,
    /// Wait between the two index reads of one sample
    pub sample_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            sample_window: Duration::from_millis(100),
        }
    }
}

impl MonitorConfig {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn sample_window(mut self, window: Duration) -> Self {
        self.sample_window = window;
        self
    }
}

/// Outcome of one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub live_up: usize,
    pub live_down: usize,
    pub proxy_up: usize,
    pub proxy_down: usize,
}

/// Background sampler of producer progress
pub struct LivenessMonitor {
    live: Arc<StreamRegistry>,
    proxy: Arc<ProxyRegistry>,
    config: MonitorConfig,
}

impl LivenessMonitor {
    pub fn new(live: Arc<StreamRegistry>, proxy: Arc<ProxyRegistry>, config: MonitorConfig) -> Self {
        Self {
            live,
            proxy,
            config,
        }
    }

    /// Take one sample and record the verdict on every stream
    pub async fn run_once(&self) -> LivenessReport {
        let live_before = self.live.sequence_indices().await;
        let proxy_before = self.proxy.sequence_indices().await;

        tokio::time::sleep(self.config.sample_window).await;

        let live_after = self.live.sequence_indices().await;
        let proxy_after = self.proxy.sequence_indices().await;

        let mut report = LivenessReport::default();
        for (id, alive) in compare(&live_before, &live_after) {
            if alive {
                report.live_up += 1;
            } else {
                report.live_down += 1;
            }
            self.live.set_input_status(&id, alive).await;
        }
        for (id, alive) in compare(&proxy_before, &proxy_after) {
            if alive {
                report.proxy_up += 1;
            } else {
                report.proxy_down += 1;
            }
            self.proxy.set_input_status(&id, alive).await;
        }

        tracing::debug!(
            live_up = report.live_up,
            live_down = report.live_down,
            proxy_up = report.proxy_up,
            proxy_down = report.proxy_down,
            "Liveness sampled"
        );
        report
    }

    /// Spawn the periodic sampling task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

/// Streams present in both snapshots, with whether their index moved
fn compare(before: &HashMap<String, u64>, after: &HashMap<String, u64>) -> Vec<(String, bool)> {
    after
        .iter()
        .map(|(id, index)| {
            let alive = before.get(id).map_or(false, |prev| prev != index);
            (id.clone(), alive)
        })
        .collect()
}
