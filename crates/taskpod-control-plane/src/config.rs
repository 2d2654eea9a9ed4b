//! Control plane configuration.

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address for health and metrics.
    pub http_bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}
