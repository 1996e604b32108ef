//! Relay lifecycle
//!
//! Owns the live and proxy registries, bootstraps configured inputs and
//! runs the liveness monitor while started.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::monitor::LivenessMonitor;
use crate::receiver::Receiver;
use crate::registry::{ProxyRegistry, StreamRegistry};
use crate::server::config::{InputConfig, OutputConfig, RelayConfig};
use crate::stats::SystemStatus;

/// Media relay core
pub struct MediaRelay {
    config: RelayConfig,
    live: Arc<StreamRegistry>,
    proxy: Arc<ProxyRegistry>,
    monitor: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl MediaRelay {
    /// Create a relay with empty registries
    pub fn new(config: RelayConfig) -> Self {
        Self {
            live: Arc::new(StreamRegistry::with_config(config.registry.clone())),
            proxy: Arc::new(ProxyRegistry::with_config(config.registry.clone())),
            config,
            monitor: None,
            started_at: Instant::now(),
        }
    }

    /// Live stream registry
    pub fn live(&self) -> &Arc<StreamRegistry> {
        &self.live
    }

    /// Proxy stream registry
    pub fn proxy(&self) -> &Arc<ProxyRegistry> {
        &self.proxy
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bootstrap configured inputs and start the liveness monitor.
    ///
    /// An input that fails to start is logged and skipped. Returns the number
    /// of inputs started.
    pub async fn start(&mut self) -> Result<usize> {
        let mut started = 0;
        for input in &self.config.inputs {
            match self.add_input(input).await {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::warn!(stream = %input.stream_id, uri = %input.uri, error = %e, "Input not started");
                }
            }
        }

        if self.config.monitor_enabled && self.monitor.is_none() {
            let monitor = LivenessMonitor::new(
                Arc::clone(&self.live),
                Arc::clone(&self.proxy),
                self.config.monitor.clone(),
            );
            self.monitor = Some(monitor.spawn());
        }

        tracing::info!(inputs = started, configured = self.config.inputs.len(), "Relay started");
        Ok(started)
    }

    /// Register one input and its outputs.
    ///
    /// Pull inputs get a receiver built from their URI scheme; push inputs are
    /// registered without one.
    pub async fn add_input(&self, input: &InputConfig) -> Result<()> {
        if input.push {
            self.live.add_push_stream(&input.stream_id, &input.uri).await?;
        } else {
            let receiver = Receiver::from_uri(&input.uri, self.config.receiver.clone())?;
            self.live
                .add_stream(&input.stream_id, &input.uri, receiver)
                .await?;
        }
        self.add_outputs(&input.stream_id, &input.outputs).await;
        Ok(())
    }

    /// Register an input driven by a caller-built receiver
    pub async fn add_input_with(&self, input: &InputConfig, receiver: Receiver) -> Result<()> {
        self.live
            .add_stream(&input.stream_id, &input.uri, receiver)
            .await?;
        self.add_outputs(&input.stream_id, &input.outputs).await;
        Ok(())
    }

    async fn add_outputs(&self, stream_id: &str, outputs: &[OutputConfig]) {
        for output in outputs {
            if let Err(e) = self
                .live
                .add_output(stream_id, &output.protocol, output.enabled, output.param.clone())
                .await
            {
                tracing::warn!(stream = %stream_id, protocol = %output.protocol, error = %e, "Output not added");
            }
        }
    }

    /// Tear down everything served over an egress protocol.
    ///
    /// Removes live sessions of that protocol and proxy streams requested over
    /// it. Returns the number of sessions and proxy streams removed.
    pub async fn stop_output(&self, protocol: &str) -> usize {
        let sessions = self.live.remove_session_by_output(protocol).await;
        let proxies = self.proxy.remove_stream_by_output(protocol).await;
        tracing::info!(protocol = %protocol, sessions = sessions, proxies = proxies, "Output stopped");
        sessions + proxies
    }

    /// Snapshot of every live and proxy stream
    pub async fn status(&self) -> SystemStatus {
        SystemStatus {
            uptime: self.started_at.elapsed(),
            live: self.live.streams().await.into_iter().map(Into::into).collect(),
            proxy: self.proxy.streams().await.into_iter().map(Into::into).collect(),
        }
    }

    /// Current live streams as input configuration, ordered by id
    pub async fn snapshot_inputs(&self) -> Vec<InputConfig> {
        self.live
            .streams()
            .await
            .into_iter()
            .map(|info| InputConfig {
                push: info.push,
                stream_id: info.id,
                uri: info.uri,
                outputs: info.outputs.into_iter().map(OutputConfig::from).collect(),
            })
            .collect()
    }

    /// Whether the liveness monitor is running
    pub fn is_monitoring(&self) -> bool {
        self.monitor.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the monitor and remove every stream
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.monitor.take() {
            handle.abort();
        }
        let live = self.live.clear().await;
        let proxy = self.proxy.clear().await;
        tracing::info!(live = live, proxy = proxy, "Relay shut down");
    }

    /// Start, run until `shutdown` resolves, then shut down
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        tracing::info!("Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

impl Drop for MediaRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.take() {
            handle.abort();
        }
    }
}
