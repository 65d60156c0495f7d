//! Configuration for the client replica.

/// Configuration for a client replica.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session id stamped on every action this replica issues.
    ///
    /// Must be unique across all clients of a server; a fresh random id is
    /// generated by default.
    pub client_id: String,
}

impl ClientConfig {
    /// Creates a configuration with a random client id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Sets the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
