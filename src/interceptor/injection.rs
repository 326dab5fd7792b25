//! Artificial delay and failure injection
//!
//! Resilience-testing hooks consumed ahead of the interceptor's normal path:
//! matching requests can be slowed down by a fixed or randomized delay, or
//! failed outright with a configurable error kind and rate.

use crate::interceptor::transport::TransportError;
use crate::models::HttpMethod;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay injection for matching requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDelayConfig {
    pub enabled: bool,
    /// Fixed delay in seconds; overrides the min/max range when set
    pub fixed_delay: Option<f64>,
    /// Minimum random delay in seconds
    pub min_delay: f64,
    /// Maximum random delay in seconds
    pub max_delay: f64,
    /// URL substrings to match; empty matches all URLs
    pub url_patterns: Vec<String>,
    /// Methods to match; empty matches all methods
    pub http_methods: Vec<String>,
}

impl Default for RequestDelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fixed_delay: None,
            min_delay: 1.0,
            max_delay: 3.0,
            url_patterns: Vec::new(),
            http_methods: Vec::new(),
        }
    }
}

impl RequestDelayConfig {
    pub fn applies_to(&self, url: &str, method: HttpMethod) -> bool {
        self.enabled && matches_scope(&self.url_patterns, &self.http_methods, url, method)
    }

    /// The delay to apply to a matching request
    pub fn delay(&self) -> Duration {
        let secs = match self.fixed_delay {
            Some(fixed) => fixed,
            None if self.max_delay > self.min_delay => {
                rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
            }
            None => self.min_delay,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Kind of failure to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Timeout,
    ConnectionLost,
    NotConnectedToInternet,
    CannotFindHost,
    DnsLookupFailed,
    /// Synthesize an HTTP error response with this status code
    HttpError(u16),
    SslError,
    Cancelled,
}

/// What an injected failure turns into on the session
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    /// Fail the session with a transport error
    Error(TransportError),
    /// Serve a synthesized empty response with this status
    HttpStatus(u16),
}

/// Failure injection for matching requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFailureConfig {
    pub enabled: bool,
    /// Probability in [0, 1] that a matching request fails
    pub failure_rate: f64,
    pub kind: FailureKind,
    /// URL substrings to match; empty matches all URLs
    pub url_patterns: Vec<String>,
    /// Methods to match; empty matches all methods
    pub http_methods: Vec<String>,
}

impl Default for NetworkFailureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_rate: 1.0,
            kind: FailureKind::ConnectionLost,
            url_patterns: Vec::new(),
            http_methods: Vec::new(),
        }
    }
}

impl NetworkFailureConfig {
    pub fn applies_to(&self, url: &str, method: HttpMethod) -> bool {
        self.enabled && matches_scope(&self.url_patterns, &self.http_methods, url, method)
    }

    /// Roll the failure rate for one matching request
    pub fn roll(&self) -> Option<InjectedFailure> {
        if rand::thread_rng().gen::<f64>() >= self.failure_rate {
            return None;
        }
        Some(self.outcome())
    }

    fn outcome(&self) -> InjectedFailure {
        match self.kind {
            FailureKind::Timeout => {
                InjectedFailure::Error(TransportError::Timeout("injected timeout".to_string()))
            }
            FailureKind::ConnectionLost => InjectedFailure::Error(TransportError::ConnectionLost(
                "injected connection loss".to_string(),
            )),
            FailureKind::NotConnectedToInternet => InjectedFailure::Error(TransportError::Other(
                "injected offline failure".to_string(),
            )),
            FailureKind::CannotFindHost => InjectedFailure::Error(TransportError::Other(
                "injected unknown host failure".to_string(),
            )),
            FailureKind::DnsLookupFailed => InjectedFailure::Error(TransportError::Other(
                "injected DNS failure".to_string(),
            )),
            FailureKind::HttpError(status) => InjectedFailure::HttpStatus(status),
            FailureKind::SslError => {
                InjectedFailure::Error(TransportError::Other("injected TLS failure".to_string()))
            }
            FailureKind::Cancelled => InjectedFailure::Error(TransportError::Cancelled),
        }
    }
}

fn matches_scope(
    url_patterns: &[String],
    http_methods: &[String],
    url: &str,
    method: HttpMethod,
) -> bool {
    if !url_patterns.is_empty() && !url_patterns.iter().any(|p| url.contains(p.as_str())) {
        return false;
    }
    if !http_methods.is_empty()
        && !http_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_configs_never_apply() {
        let delay = RequestDelayConfig::default();
        assert!(!delay.applies_to("https://example.com", HttpMethod::Get));

        let failure = NetworkFailureConfig::default();
        assert!(!failure.applies_to("https://example.com", HttpMethod::Get));
    }

    #[test]
    fn scoping_by_url_and_method() {
        let delay = RequestDelayConfig {
            enabled: true,
            url_patterns: vec!["api.example.com".to_string()],
            http_methods: vec!["POST".to_string()],
            ..Default::default()
        };
        assert!(delay.applies_to("https://api.example.com/users", HttpMethod::Post));
        assert!(!delay.applies_to("https://api.example.com/users", HttpMethod::Get));
        assert!(!delay.applies_to("https://other.com/users", HttpMethod::Post));
    }

    #[test]
    fn fixed_delay_overrides_range() {
        let delay = RequestDelayConfig {
            enabled: true,
            fixed_delay: Some(0.25),
            ..Default::default()
        };
        assert_eq!(delay.delay(), Duration::from_millis(250));
    }

    #[test]
    fn random_delay_stays_in_range() {
        let delay = RequestDelayConfig {
            enabled: true,
            min_delay: 0.1,
            max_delay: 0.2,
            ..Default::default()
        };
        for _ in 0..32 {
            let d = delay.delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn full_failure_rate_always_fires() {
        let failure = NetworkFailureConfig {
            enabled: true,
            failure_rate: 1.0,
            kind: FailureKind::ConnectionLost,
            ..Default::default()
        };
        match failure.roll() {
            Some(InjectedFailure::Error(err)) => assert!(err.is_connection_lost()),
            other => panic!("expected connection-lost injection, got {other:?}"),
        }
    }

    #[test]
    fn zero_failure_rate_never_fires() {
        let failure = NetworkFailureConfig {
            enabled: true,
            failure_rate: 0.0,
            ..Default::default()
        };
        for _ in 0..32 {
            assert!(failure.roll().is_none());
        }
    }

    #[test]
    fn http_error_kind_synthesizes_status() {
        let failure = NetworkFailureConfig {
            enabled: true,
            failure_rate: 1.0,
            kind: FailureKind::HttpError(503),
            ..Default::default()
        };
        match failure.roll() {
            Some(InjectedFailure::HttpStatus(status)) => assert_eq!(status, 503),
            other => panic!("expected http status injection, got {other:?}"),
        }
    }
}
