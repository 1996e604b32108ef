//! Receiver configuration

use std::time::Duration;

/// Ingestion settings applied to every receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Deadline for each connect and read call
    pub timeout: Duration,

    /// Delay between reconnect attempts (no jitter)
    pub retry_interval: Duration,

    /// Frame rate used for timestamps when neither the source nor the SPS reports one
    pub default_fps: u32,

    /// Capacity of the status event channel
    pub event_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retry_interval: Duration::from_secs(1),
            default_fps: 25,
            event_capacity: 16,
        }
    }
}

impl ReceiverConfig {
    /// Set the connect/read deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the reconnect interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the fallback frame rate (at least 1)
    pub fn default_fps(mut self, fps: u32) -> Self {
        self.default_fps = fps.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReceiverConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.default_fps, 25);
    }

    #[test]
    fn test_builder_chaining() {
        let config = ReceiverConfig::default()
            .timeout(Duration::from_millis(500))
            .retry_interval(Duration::from_millis(50))
            .default_fps(0);

        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.retry_interval, Duration::from_millis(50));
        assert_eq!(config.default_fps, 1);
    }
}
