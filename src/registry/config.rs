//! Registry configuration

/// Default capacity of a session's frame queue
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 5;

/// Configuration shared by the live and proxy registries
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Frames a session may hold before new frames are dropped for it
    pub session_queue_capacity: usize,

    /// Capacity of a proxy receiver's frame queue
    pub proxy_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            proxy_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Set the per-session queue capacity (at least 1)
    pub fn session_queue_capacity(mut self, capacity: usize) -> Self {
        self.session_queue_capacity = capacity.max(1);
        self
    }

    /// Set the proxy receiver queue capacity (at least 1)
    pub fn proxy_queue_capacity(mut self, capacity: usize) -> Self {
        self.proxy_queue_capacity = capacity.max(1);
        self
    }
}
