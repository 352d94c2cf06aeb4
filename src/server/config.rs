//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Default subscribe route: `GET {prefix}{taskId}{suffix}`
pub const DEFAULT_ROUTE_PREFIX: &str = "/api/download/";
/// Default subscribe route suffix
pub const DEFAULT_ROUTE_SUFFIX: &str = "/sse";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Interval between keep-alive comments (None = disabled)
    pub keep_alive_interval: Option<Duration>,

    /// Time allowed to register a subscription before answering 408
    pub request_timeout: Duration,

    /// Subscribe route prefix (before the task id)
    pub route_prefix: String,

    /// Subscribe route suffix (after the task id)
    pub route_suffix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            max_connections: 0, // Unlimited
            keep_alive_interval: Some(Duration::from_secs(15)),
            request_timeout: Duration::from_secs(10),
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
            route_suffix: DEFAULT_ROUTE_SUFFIX.to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the keep-alive comment interval
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Disable keep-alive comments
    pub fn disable_keep_alive(mut self) -> Self {
        self.keep_alive_interval = None;
        self
    }

    /// Set the subscription timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the subscribe route
    pub fn route(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.route_prefix = prefix.into();
        self.route_suffix = suffix.into();
        self
    }

    /// Router path of the subscribe route, with `{task_id}` as the capture
    pub fn route_path(&self) -> String {
        format!("{}{{task_id}}{}", self.route_prefix, self.route_suffix)
    }
}
