//! Client configuration

use std::time::Duration;

use super::buffer::FormatDescriptor;

/// Primary format: H.264 High + AAC-LC in fragmented MP4
pub const DEFAULT_PRIMARY_FORMAT: &str = r#"video/mp4; codecs="avc1.64001f, mp4a.40.2""#;

/// Fallbacks, tried in this order after the primary is rejected
pub const DEFAULT_FALLBACK_FORMATS: [&str; 3] = [
    r#"video/mp4; codecs="avc1.42E01E, mp4a.40.2""#,
    r#"video/mp4; codecs="avc1.640028, mp4a.40.2""#,
    "video/mp4",
];

/// Stream session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Descriptor tried first
    pub primary_format: FormatDescriptor,
    /// Descriptors tried, in order, when the primary is rejected
    pub fallback_formats: Vec<FormatDescriptor>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            primary_format: FormatDescriptor::new(DEFAULT_PRIMARY_FORMAT),
            fallback_formats: DEFAULT_FALLBACK_FORMATS
                .iter()
                .map(|f| FormatDescriptor::new(*f))
                .collect(),
        }
    }
}

impl SessionConfig {
    /// Set the primary format
    pub fn primary_format(mut self, format: impl Into<FormatDescriptor>) -> Self {
        self.primary_format = format.into();
        self
    }

    /// Replace the fallback list
    pub fn fallback_formats<I, F>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FormatDescriptor>,
    {
        self.fallback_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Every candidate in negotiation order
    pub fn candidates(&self) -> impl Iterator<Item = &FormatDescriptor> {
        std::iter::once(&self.primary_format).chain(self.fallback_formats.iter())
    }
}

/// Reconnect policy for the progress subscriber after a push-channel drop
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts before giving up (0 = never reconnect)
    pub max_retries: u32,
    /// Delay before the first reconnect
    pub initial_backoff: Duration,
    /// Upper bound for any delay
    pub max_backoff: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial backoff
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the backoff cap
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_backoff.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether another attempt is allowed
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// HTTP client configuration for the control and event endpoints
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, without trailing slash
    pub base_url: String,
    /// Timeout for control requests (status, stop)
    pub request_timeout: Duration,
    /// Timeout for establishing connections
    pub connect_timeout: Duration,
    /// Reconnect policy for the progress subscriber
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config for a server base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set the control request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidates_order() {
        let config = SessionConfig::default();
        let candidates: Vec<&str> = config.candidates().map(|f| f.as_str()).collect();

        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0], DEFAULT_PRIMARY_FORMAT);
        assert_eq!(candidates[3], "video/mp4");
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::default()
            .primary_format("video/webm")
            .fallback_formats(["audio/mp4"]);

        let candidates: Vec<&str> = config.candidates().map(|f| f.as_str()).collect();
        assert_eq!(candidates, vec!["video/webm", "audio/mp4"]);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(1));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_never_reconnects() {
        let policy = ReconnectPolicy::never();
        assert!(!policy.allows(1));
        assert!(ReconnectPolicy::default().allows(5));
        assert!(!ReconnectPolicy::default().allows(6));
    }

    #[test]
    fn test_client_config_trims_slash() {
        let config = ClientConfig::new("http://127.0.0.1:9000/");
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
    }
}
