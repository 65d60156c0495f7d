//! Server configuration.

/// Default number of log entries kept regardless of listener progress.
pub const DEFAULT_BUFFER_MIN: usize = 1000;

/// Configuration for the object store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Minimum number of most recent actions retained per object.
    ///
    /// Listeners that fall behind by less than this many actions are still
    /// served incrementally instead of with a full snapshot.
    pub buffer_min: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_min: DEFAULT_BUFFER_MIN,
        }
    }

    /// Sets the retained log tail.
    #[must_use]
    pub fn with_buffer_min(mut self, buffer_min: usize) -> Self {
        self.buffer_min = buffer_min;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
