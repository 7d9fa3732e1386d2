use rowstream_client::ClientConfig;

/// Settings for a [`TestProxy`](crate::TestProxy).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Used for sessions created implicitly on first use.
    pub default_client: ClientConfig,
}

impl ProxyConfig {
    /// Sessions connect to `data_target` unless created with their own config.
    pub fn with_target(data_target: impl Into<String>) -> Self {
        Self {
            default_client: ClientConfig::with_target(data_target),
        }
    }
}
