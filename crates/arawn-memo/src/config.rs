//! Configuration for memo sessions.

/// Default session name used in log fields.
pub const DEFAULT_SESSION_NAME: &str = "session";

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name reported in tracing fields.
    pub name: String,

    /// Whether failed calls are stored and replayed.
    /// If false, only successful results are memoized.
    pub cache_failures: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SESSION_NAME.to_string(),
            cache_failures: true,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable storing failed calls.
    pub fn with_failure_caching(mut self, enabled: bool) -> Self {
        self.cache_failures = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new();
        assert_eq!(config.name, DEFAULT_SESSION_NAME);
        assert!(config.cache_failures);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .with_name("worker-1")
            .with_failure_caching(false);
        assert_eq!(config.name, "worker-1");
        assert!(!config.cache_failures);
    }
}
