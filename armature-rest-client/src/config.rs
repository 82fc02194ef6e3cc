//! REST client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{BreakerError, Error, Request, Result};

/// Transport configuration for the default reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Request timeout enforced by the transport.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// User agent sent when no product info is configured.
    pub user_agent: String,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            user_agent: format!("armature-rest-client/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

impl RestClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RestClientConfigBuilder {
        RestClientConfigBuilder::default()
    }
}

/// Builder for [`RestClientConfig`].
#[derive(Debug, Default)]
pub struct RestClientConfigBuilder {
    config: RestClientConfig,
}

impl RestClientConfigBuilder {
    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Set the default user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RestClientConfig {
        self.config
    }
}

/// Callback invoked when the circuit breaker rejects or times out a call.
///
/// Receives the breaker error and the request that was about to be dispatched.
pub type Fallback = Arc<dyn Fn(BreakerError, &Request) + Send + Sync>;

/// Circuit breaker parameters.
///
/// All durations and `max_failures` must be non-zero. A `bulkhead_size` of
/// zero means concurrent calls are unbounded.
#[derive(Clone)]
pub struct CircuitParameters {
    /// Time a protected call may take before it counts as a failure.
    ///
    /// Includes any wait for a bulkhead permit. A call that times out while
    /// still waiting is diverted without counting as a failure.
    pub timeout: Duration,
    /// Time the circuit stays open before allowing a trial call.
    pub reset_timeout: Duration,
    /// Failures within the rolling window that open the circuit.
    pub max_failures: u32,
    /// Window over which failures are counted.
    pub rolling_window: Duration,
    /// Maximum concurrent protected calls (0 = unbounded).
    pub bulkhead_size: usize,
    /// Invoked whenever the breaker diverts a call.
    pub fallback: Fallback,
}

impl CircuitParameters {
    /// Create parameters with default thresholds and the given fallback.
    pub fn new<F>(fallback: F) -> Self
    where
        F: Fn(BreakerError, &Request) + Send + Sync + 'static,
    {
        Self {
            timeout: Duration::from_secs(1),
            reset_timeout: Duration::from_secs(60),
            max_failures: 5,
            rolling_window: Duration::from_secs(10),
            bulkhead_size: 0,
            fallback: Arc::new(fallback),
        }
    }

    /// Set the call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the failure threshold.
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Set the rolling failure window.
    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    /// Set the bulkhead size.
    pub fn with_bulkhead_size(mut self, size: usize) -> Self {
        self.bulkhead_size = size;
        self
    }

    /// Check that every numeric field except `bulkhead_size` is positive.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("timeout", self.timeout.is_zero()),
            ("reset_timeout", self.reset_timeout.is_zero()),
            ("max_failures", self.max_failures == 0),
            ("rolling_window", self.rolling_window.is_zero()),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(Error::InvalidConfig(format!(
                "circuit parameter `{field}` must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CircuitParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitParameters")
            .field("timeout", &self.timeout)
            .field("reset_timeout", &self.reset_timeout)
            .field("max_failures", &self.max_failures)
            .field("rolling_window", &self.rolling_window)
            .field("bulkhead_size", &self.bulkhead_size)
            .finish_non_exhaustive()
    }
}
