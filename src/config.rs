use crate::reconnect::ReconnectPolicy;
use std::time::Duration;
use url::Url;

/// Path of the proxy's event stream, relative to its host
pub const EVENTS_PATH: &str = "/ws/events";

/// Configuration for the event client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the event stream (ws:// or wss://)
    pub url: Url,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Retry schedule applied after transport failures
    pub reconnect: ReconnectPolicy,
    /// Keepalive settings for a live connection
    pub health: HealthConfig,
}

impl ClientConfig {
    /// Create a new builder targeting `url`
    pub fn builder(url: Url) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                url,
                connect_timeout: Duration::from_secs(10),
                reconnect: ReconnectPolicy::default(),
                health: HealthConfig::default(),
            },
        }
    }

    /// Build a default configuration from the proxy's HTTP API base URL.
    ///
    /// `http://host:port/api` becomes `ws://host:port/ws/events`, and `https`
    /// maps to `wss`.
    pub fn from_api_base(base: &str) -> Result<ClientConfig, ConfigError> {
        Self::builder(events_url(base)?).build()
    }
}

/// Derive the event stream URL from an HTTP(S) base URL.
pub fn events_url(base: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(base).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConfigError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::InvalidUrl(format!("cannot use scheme '{}'", scheme)))?;
    url.set_path(EVENTS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Builder for ClientConfig
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Set the maximum consecutive failures before giving up (`None` = never)
    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.config.reconnect.max_attempts = max;
        self
    }

    /// Set health configuration
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.config.health = config;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let config = self.config;

        match config.url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "expected ws:// or wss://, got '{}'",
                    other
                )))
            }
        }
        if config.url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl("no host in URL".to_string()));
        }

        if config.reconnect.base_delay.is_zero() {
            return Err(ConfigError::InvalidBackoff(
                "base_delay must be > 0".to_string(),
            ));
        }
        if config.reconnect.max_delay < config.reconnect.base_delay {
            return Err(ConfigError::InvalidBackoff(
                "max_delay must be >= base_delay".to_string(),
            ));
        }

        if config.health.pong_timeout > config.health.ping_interval {
            return Err(ConfigError::InvalidHealth(
                "pong_timeout should be <= ping_interval".to_string(),
            ));
        }
        if config.health.failure_threshold == 0 {
            return Err(ConfigError::InvalidHealth(
                "failure_threshold must be >= 1".to_string(),
            ));
        }

        Ok(config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Invalid backoff configuration
    #[error("Invalid backoff configuration: {0}")]
    InvalidBackoff(String),
    /// Invalid health configuration
    #[error("Invalid health configuration: {0}")]
    InvalidHealth(String),
}

/// Health monitoring configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval for sending WebSocket pings
    pub ping_interval: Duration,
    /// Timeout for receiving a pong response
    pub pong_timeout: Duration,
    /// Reconnect when no data frame arrives for this long (`None` disables)
    pub data_timeout: Option<Duration>,
    /// Number of consecutive missed pongs before marking unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            // The proxy pushes a metrics snapshot every 5 seconds
            data_timeout: Some(Duration::from_secs(30)),
            failure_threshold: 3,
        }
    }
}
