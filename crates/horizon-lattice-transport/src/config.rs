//! Configuration for the request bridge.

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Default size of the buffer each response read is issued with.
pub const DEFAULT_RESPONSE_BUFFER_SIZE: usize = 100 * 1024;

/// Default number of executor threads running engine callbacks.
pub const DEFAULT_THREADS_COUNT: usize = 4;

/// Configuration shared read-only by every request a bridge executes.
///
/// # Example
///
/// ```
/// use horizon_lattice_transport::EngineConfig;
///
/// let config = EngineConfig::new()
///     .follow_redirects(true)
///     .response_buffer_size(16 * 1024)
///     .max_response_size(8 * 1024 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether redirects are followed. When disabled, the redirect response
    /// itself is returned to the caller.
    pub follow_redirects: bool,
    /// Capacity of the buffer every response read is issued with.
    pub response_buffer_size: usize,
    /// Number of executor threads running engine callbacks.
    ///
    /// This bounds how many callbacks run at once across all requests of a
    /// bridge. A callback that blocks holds a thread until it returns.
    pub threads_count: usize,
    /// Maximum request body size in bytes. `None` means unlimited.
    pub max_upload_size: Option<usize>,
    /// Maximum response body size in bytes. `None` means unlimited.
    pub max_response_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            response_buffer_size: DEFAULT_RESPONSE_BUFFER_SIZE,
            threads_count: DEFAULT_THREADS_COUNT,
            max_upload_size: None,
            max_response_size: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    ///
    /// ```
    /// use horizon_lattice_transport::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str("follow_redirects = true").unwrap();
    /// assert!(config.follow_redirects);
    /// assert_eq!(config.threads_count, 4);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can run requests.
    pub fn validate(&self) -> Result<()> {
        if self.response_buffer_size == 0 {
            return Err(BridgeError::config("response_buffer_size must be non-zero"));
        }
        if self.threads_count == 0 {
            return Err(BridgeError::config("threads_count must be non-zero"));
        }
        Ok(())
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enabled: bool) -> Self {
        self.follow_redirects = enabled;
        self
    }

    /// Set the response read buffer size.
    pub fn response_buffer_size(mut self, size: usize) -> Self {
        self.response_buffer_size = size;
        self
    }

    /// Set the number of callback executor threads.
    pub fn threads_count(mut self, count: usize) -> Self {
        self.threads_count = count;
        self
    }

    /// Limit the request body size.
    pub fn max_upload_size(mut self, limit: usize) -> Self {
        self.max_upload_size = Some(limit);
        self
    }

    /// Limit the response body size.
    pub fn max_response_size(mut self, limit: usize) -> Self {
        self.max_response_size = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(!config.follow_redirects);
        assert_eq!(config.response_buffer_size, 102400);
        assert_eq!(config.threads_count, 4);
        assert!(config.max_upload_size.is_none());
        assert!(config.max_response_size.is_none());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .follow_redirects(true)
            .response_buffer_size(1024)
            .threads_count(8)
            .max_upload_size(10)
            .max_response_size(20);

        assert!(config.follow_redirects);
        assert_eq!(config.response_buffer_size, 1024);
        assert_eq!(config.threads_count, 8);
        assert_eq!(config.max_upload_size, Some(10));
        assert_eq!(config.max_response_size, Some(20));
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            follow_redirects = true
            response_buffer_size = 4096
            max_response_size = 65536
            "#,
        )
        .unwrap();

        assert!(config.follow_redirects);
        assert_eq!(config.response_buffer_size, 4096);
        assert_eq!(config.threads_count, DEFAULT_THREADS_COUNT);
        assert_eq!(config.max_response_size, Some(65536));
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(matches!(
            EngineConfig::from_toml_str("threads_count = 0"),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("follow_redirects = \"yes\""),
            Err(BridgeError::Config(_))
        ));
    }
}
