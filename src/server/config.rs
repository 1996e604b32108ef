//! Relay configuration

use crate::monitor::MonitorConfig;
use crate::receiver::ReceiverConfig;
use crate::registry::{Output, RegistryConfig};

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Queue capacities for both registries
    pub registry: RegistryConfig,

    /// Timeouts, retry interval and default fps for receivers built from inputs
    pub receiver: ReceiverConfig,

    /// Liveness sampling cadence
    pub monitor: MonitorConfig,

    /// Run the liveness monitor while the relay is started
    pub monitor_enabled: bool,

    /// Streams bootstrapped by [`MediaRelay::start`](super::MediaRelay::start)
    pub inputs: Vec<InputConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            receiver: ReceiverConfig::default(),
            monitor: MonitorConfig::default(),
            monitor_enabled: true,
            inputs: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Set registry configuration
    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    /// Set receiver configuration
    pub fn receiver(mut self, config: ReceiverConfig) -> Self {
        self.receiver = config;
        self
    }

    /// Set liveness monitor configuration
    pub fn monitor(mut self, config: MonitorConfig) -> Self {
        self.monitor = config;
        self
    }

    /// Do not sample producer liveness
    pub fn disable_monitor(mut self) -> Self {
        self.monitor_enabled = false;
        self
    }

    /// Add an input to bootstrap
    pub fn input(mut self, input: InputConfig) -> Self {
        self.inputs.push(input);
        self
    }
}

/// One configured live stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputConfig {
    pub stream_id: String,
    pub uri: String,

    /// Register as a push stream and wait for a front end to attach a receiver
    pub push: bool,

    pub outputs: Vec<OutputConfig>,
}

impl InputConfig {
    /// Pull input whose receiver is built from the URI scheme
    pub fn new(stream_id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            uri: uri.into(),
            push: false,
            outputs: Vec::new(),
        }
    }

    /// Push input, registered without a receiver
    pub fn push(stream_id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            push: true,
            ..Self::new(stream_id, uri)
        }
    }

    /// Enable an output protocol
    pub fn output(mut self, protocol: impl Into<String>) -> Self {
        self.outputs.push(OutputConfig::new(protocol));
        self
    }

    /// Enable an output protocol with a protocol-specific parameter
    pub fn output_with(mut self, protocol: impl Into<String>, param: impl Into<String>) -> Self {
        self.outputs.push(OutputConfig::new(protocol).param(param));
        self
    }
}

/// One configured egress protocol of an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub protocol: String,
    pub enabled: bool,
    pub param: Option<String>,
}

impl OutputConfig {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            enabled: true,
            param: None,
        }
    }

    /// Set the protocol-specific parameter
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Keep the output configured but disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl From<Output> for OutputConfig {
    fn from(output: Output) -> Self {
        Self {
            protocol: output.protocol.to_string(),
            enabled: output.enabled,
            param: output.param,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::OutputProtocol;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(config.registry.session_queue_capacity, 5);
        assert_eq!(config.receiver.timeout, Duration::from_secs(20));
        assert_eq!(config.monitor.interval, Duration::from_secs(5));
        assert!(config.monitor_enabled);
        assert!(config.inputs.is_empty());
    }

    #[test]
    fn test_builder_chain() {
        let config = RelayConfig::default()
            .registry(RegistryConfig::default().session_queue_capacity(8))
            .receiver(ReceiverConfig::default().default_fps(30))
            .disable_monitor()
            .input(InputConfig::new("cam1", "file:///tmp/cam1.h264").output("rtsp"))
            .input(InputConfig::push("cam2", "proto://host/cam2"));

        assert_eq!(config.registry.session_queue_capacity, 8);
        assert_eq!(config.receiver.default_fps, 30);
        assert!(!config.monitor_enabled);
        assert_eq!(config.inputs.len(), 2);
        assert!(!config.inputs[0].push);
        assert!(config.inputs[1].push);
    }

    #[test]
    fn test_input_outputs() {
        let input = InputConfig::new("cam1", "udp://127.0.0.1:9000")
            .output("RTSP")
            .output_with("gb28181", "34020000001320000001");

        assert_eq!(input.outputs.len(), 2);
        assert_eq!(input.outputs[0].protocol, "RTSP");
        assert!(input.outputs[0].enabled);
        assert_eq!(input.outputs[1].param.as_deref(), Some("34020000001320000001"));
    }

    #[test]
    fn test_output_config_from_output() {
        let output = Output {
            protocol: OutputProtocol::Rtmp,
            enabled: false,
            param: None,
        };
        let config = OutputConfig::from(output);

        assert_eq!(config, OutputConfig::new("rtmp").disabled());
    }
}
