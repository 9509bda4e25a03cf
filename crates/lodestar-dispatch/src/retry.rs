//! Retry policy, backoff and per-call retry bookkeeping.
//!
//! A logical call owns one [`RetryContext`]. After every attempt the context
//! turns the attempt outcome into a [`RetryDecision`]: retry on the same
//! endpoint, retry on the next endpoint, return a response, or fail. The two
//! retry budgets are tracked separately; moving to the next endpoint resets the
//! same-endpoint counter.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use http::{Method, StatusCode, Uri};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoint::ServiceEndpoint;
use crate::error::{TransportError, TransportErrorKind};
use crate::response::TransportResponse;

/// Delay applied between two attempts of the same call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Retry immediately.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `initial_ms * multiplier^attempt`, capped at `max_ms`.
    Exponential {
        /// Delay after the first attempt, in milliseconds.
        initial_ms: u64,
        /// Growth factor per attempt.
        multiplier: f64,
        /// Upper bound in milliseconds.
        max_ms: u64,
        /// Adds 0-50% random jitter on top of the computed delay.
        jitter: bool,
    },
}

impl BackoffPolicy {
    /// Exponential backoff from 100ms doubling up to 10 seconds, without jitter.
    pub fn exponential() -> Self {
        BackoffPolicy::Exponential {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 10_000,
            jitter: false,
        }
    }

    /// Delay to wait after attempt `attempt` (0-based) before the next one.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential {
                initial_ms,
                multiplier,
                max_ms,
                jitter,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let computed = initial_ms as f64 * multiplier.powi(exponent);
                let capped = computed.min(max_ms as f64).max(0.0) as u64;

                if jitter && capped > 1 {
                    let jitter_ms = rand::thread_rng().gen_range(0..=capped / 2);
                    Duration::from_millis(capped.saturating_add(jitter_ms))
                } else {
                    Duration::from_millis(capped)
                }
            }
        }
    }
}

/// Retry settings for load-balanced calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries against the endpoint that just failed (default: 0).
    pub max_retries_same_endpoint: u32,
    /// Retries against a newly resolved endpoint (default: 1).
    pub max_retries_next_endpoint: u32,
    /// Response statuses that trigger a retry (default: none).
    pub retryable_status_codes: BTreeSet<u16>,
    /// Transport failures that trigger a retry (default: every connect, reset,
    /// timeout and I/O failure; see [`default_retryable_errors`]).
    pub retryable_errors: BTreeSet<TransportErrorKind>,
    /// Retry every method, not only `GET` (default: false).
    pub retry_on_all_methods: bool,
    /// Delay between attempts (default: none).
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_same_endpoint: 0,
            max_retries_next_endpoint: 1,
            retryable_status_codes: BTreeSet::new(),
            retryable_errors: default_retryable_errors(),
            retry_on_all_methods: false,
            backoff: BackoffPolicy::None,
        }
    }
}

/// Decides which outcomes may be retried and how long to wait.
pub trait RetryPolicy: Send + Sync {
    /// Whether requests with this method may be retried at all.
    fn can_retry_method(&self, method: &Method) -> bool;

    /// Whether a transport failure is worth another attempt.
    fn is_retryable_error(&self, error: &TransportError) -> bool;

    /// Whether a response status should trigger another attempt.
    fn is_retryable_status(&self, status: StatusCode) -> bool;

    /// Delay after attempt `attempt` (0-based).
    fn backoff_delay(&self, attempt: u32) -> Duration;

    /// Retries allowed on the same endpoint before moving on.
    fn max_retries_same_endpoint(&self) -> u32;

    /// Retries allowed on newly resolved endpoints.
    fn max_retries_next_endpoint(&self) -> u32;
}

/// [`RetryPolicy`] driven by a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfiguredRetryPolicy {
    config: RetryConfig,
}

impl ConfiguredRetryPolicy {
    /// Creates a policy from `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Settings backing this policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl RetryPolicy for ConfiguredRetryPolicy {
    fn can_retry_method(&self, method: &Method) -> bool {
        self.config.retry_on_all_methods || method == Method::GET
    }

    fn is_retryable_error(&self, error: &TransportError) -> bool {
        self.config.retryable_errors.contains(&error.kind())
    }

    fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.config
            .retryable_status_codes
            .contains(&status.as_u16())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config.backoff.delay(attempt)
    }

    fn max_retries_same_endpoint(&self) -> u32 {
        self.config.max_retries_same_endpoint
    }

    fn max_retries_next_endpoint(&self) -> u32 {
        self.config.max_retries_next_endpoint
    }
}

/// Transport failures retried when no explicit set is configured.
///
/// A refused connection is included: another endpoint of the same service may
/// well accept it. Only [`TransportErrorKind::Other`] is left out.
pub fn default_retryable_errors() -> BTreeSet<TransportErrorKind> {
    [
        TransportErrorKind::ConnectionRefused,
        TransportErrorKind::ConnectionTimeout,
        TransportErrorKind::ConnectionReset,
        TransportErrorKind::ReadTimeout,
        TransportErrorKind::Io,
    ]
    .into_iter()
    .collect()
}

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Which endpoint the next attempt targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTarget {
    /// Reuse the endpoint of the failed attempt.
    SameEndpoint,
    /// Ask the resolver for an endpoint, hinting at the failed one.
    NextEndpoint,
}

/// Why an attempt is being retried.
#[derive(Debug)]
pub enum RetryReason {
    /// The transport failed.
    Error(TransportError),
    /// The response status is in the retryable set. The body is buffered so the
    /// response can still be handed back if retries run out.
    Status {
        /// The buffered response.
        response: TransportResponse,
        /// Endpoint that produced it.
        endpoint: Option<ServiceEndpoint>,
        /// URI the attempt was sent to.
        uri: Uri,
    },
}

impl RetryReason {
    /// The outcome to surface when no further attempt is made.
    pub fn into_outcome(self) -> Result<TransportResponse, TransportError> {
        match self {
            RetryReason::Error(e) => Err(e),
            RetryReason::Status { response, .. } => Ok(response),
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Error(e) => write!(f, "transport error: {}", e),
            RetryReason::Status {
                response,
                endpoint,
                uri,
            } => {
                write!(f, "retryable status {} from {}", response.status().as_u16(), uri)?;
                if let Some(endpoint) = endpoint {
                    write!(f, " ({})", endpoint)?;
                }
                Ok(())
            }
        }
    }
}

/// Result of evaluating one attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Make another attempt.
    Retry {
        /// Endpoint selection for the next attempt.
        target: RetryTarget,
        /// What went wrong with this attempt.
        reason: RetryReason,
    },
    /// Hand this response to the caller.
    Return(TransportResponse),
    /// Surface this error to the caller.
    Fail(TransportError),
}

impl RetryDecision {
    fn conclude(reason: RetryReason) -> Self {
        match reason.into_outcome() {
            Ok(response) => RetryDecision::Return(response),
            Err(error) => RetryDecision::Fail(error),
        }
    }
}

/// Mutable state of one logical call across its attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    attempts: u32,
    same_endpoint_retries: u32,
    next_endpoint_retries: u32,
    endpoint: Option<ServiceEndpoint>,
    previous_endpoint: Option<ServiceEndpoint>,
    reuse_endpoint: bool,
}

impl RetryContext {
    /// Fresh state for a new logical call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Same-endpoint retries since the last endpoint change.
    pub fn same_endpoint_retries(&self) -> u32 {
        self.same_endpoint_retries
    }

    /// Next-endpoint retries so far.
    pub fn next_endpoint_retries(&self) -> u32 {
        self.next_endpoint_retries
    }

    /// Endpoint of the current (or last) attempt.
    pub fn endpoint(&self) -> Option<&ServiceEndpoint> {
        self.endpoint.as_ref()
    }

    /// Endpoint of the attempt before the current one.
    pub fn previous_endpoint(&self) -> Option<&ServiceEndpoint> {
        self.previous_endpoint.as_ref()
    }

    /// The endpoint to reuse, if the last decision asked for a same-endpoint retry.
    pub fn endpoint_to_reuse(&self) -> Option<&ServiceEndpoint> {
        if self.reuse_endpoint {
            self.endpoint.as_ref()
        } else {
            None
        }
    }

    /// Makes `endpoint` the target of the upcoming attempt.
    pub fn select_endpoint(&mut self, endpoint: ServiceEndpoint) {
        self.previous_endpoint = self.endpoint.replace(endpoint);
        self.reuse_endpoint = false;
    }

    /// Counts one transport attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Turns the outcome of the latest attempt into a decision and updates the
    /// retry counters.
    pub fn evaluate(
        &mut self,
        policy: &dyn RetryPolicy,
        method: &Method,
        uri: &Uri,
        outcome: Result<TransportResponse, TransportError>,
    ) -> RetryDecision {
        let reason = match outcome {
            Ok(response) if policy.is_retryable_status(response.status()) => RetryReason::Status {
                response,
                endpoint: self.endpoint.clone(),
                uri: uri.clone(),
            },
            Ok(response) => return RetryDecision::Return(response),
            Err(error) if policy.is_retryable_error(&error) => RetryReason::Error(error),
            Err(error) => return RetryDecision::Fail(error),
        };

        if !policy.can_retry_method(method) {
            debug!(method = %method, reason = %reason, "method is not retryable");
            return RetryDecision::conclude(reason);
        }

        match self.next_target(policy) {
            Some(target) => RetryDecision::Retry { target, reason },
            None => {
                debug!(
                    attempts = self.attempts,
                    reason = %reason,
                    "retry budget exhausted"
                );
                RetryDecision::conclude(reason)
            }
        }
    }

    fn next_target(&mut self, policy: &dyn RetryPolicy) -> Option<RetryTarget> {
        let same_left = self.same_endpoint_retries < policy.max_retries_same_endpoint();
        if self.endpoint.is_some() && same_left {
            self.same_endpoint_retries += 1;
            self.reuse_endpoint = true;
            Some(RetryTarget::SameEndpoint)
        } else if self.next_endpoint_retries < policy.max_retries_next_endpoint() {
            self.next_endpoint_retries += 1;
            self.same_endpoint_retries = 0;
            self.reuse_endpoint = false;
            Some(RetryTarget::NextEndpoint)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(same: u32, next: u32, statuses: &[u16]) -> ConfiguredRetryPolicy {
        ConfiguredRetryPolicy::new(RetryConfig {
            max_retries_same_endpoint: same,
            max_retries_next_endpoint: next,
            retryable_status_codes: statuses.iter().copied().collect(),
            ..Default::default()
        })
    }

    fn uri() -> Uri {
        "http://10.0.0.1:80/x".parse().unwrap()
    }

    fn context_with_endpoint() -> RetryContext {
        let mut ctx = RetryContext::new();
        ctx.select_endpoint(ServiceEndpoint::new("a", "svc", "10.0.0.1", 80));
        ctx.record_attempt();
        ctx
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries_same_endpoint, 0);
        assert_eq!(config.max_retries_next_endpoint, 1);
        assert!(config.retryable_status_codes.is_empty());
        assert_eq!(config.retryable_errors.len(), 5);
        assert!(!config.retryable_errors.contains(&TransportErrorKind::Other));
        assert!(!config.retry_on_all_methods);
        assert_eq!(config.backoff, BackoffPolicy::None);
    }

    #[test]
    fn test_default_retryable_errors() {
        let p = ConfiguredRetryPolicy::default();
        assert!(p.is_retryable_error(&TransportError::ConnectionReset));
        assert!(p.is_retryable_error(&TransportError::ConnectionTimeout {
            addr: "127.0.0.1:8080".to_string(),
            timeout_ms: 1000
        }));
        assert!(p.is_retryable_error(&TransportError::ReadTimeout { timeout_ms: 5000 }));
        assert!(p.is_retryable_error(&TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "test"
        ))));
        assert!(p.is_retryable_error(&TransportError::ConnectionRefused {
            addr: "127.0.0.1:8080".to_string()
        }));

        assert!(!p.is_retryable_error(&TransportError::Other {
            reason: "bad request line".to_string()
        }));
    }

    #[test]
    fn test_retryable_errors_configurable() {
        let p = ConfiguredRetryPolicy::new(RetryConfig {
            retryable_errors: [TransportErrorKind::ReadTimeout].into_iter().collect(),
            ..Default::default()
        });
        assert!(p.is_retryable_error(&TransportError::ReadTimeout { timeout_ms: 10 }));
        assert!(!p.is_retryable_error(&TransportError::ConnectionReset));
        assert!(!p.is_retryable_error(&TransportError::ConnectionRefused {
            addr: "10.0.0.1:80".to_string()
        }));
    }

    #[test]
    fn test_refused_moves_to_next_endpoint() {
        let mut ctx = context_with_endpoint();
        let decision = ctx.evaluate(
            &ConfiguredRetryPolicy::default(),
            &Method::GET,
            &uri(),
            Err(TransportError::ConnectionRefused {
                addr: "10.0.0.1:80".to_string(),
            }),
        );
        assert!(matches!(
            decision,
            RetryDecision::Retry {
                target: RetryTarget::NextEndpoint,
                ..
            }
        ));
    }

    #[test]
    fn test_compute_backoff() {
        let backoff = BackoffPolicy::Exponential {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 10_000,
            jitter: false,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));

        let capped = BackoffPolicy::Exponential {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 500,
            jitter: false,
        };
        assert_eq!(capped.delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = BackoffPolicy::Exponential {
            initial_ms: 100,
            multiplier: 1.0,
            max_ms: 100,
            jitter: true,
        };
        for _ in 0..50 {
            let d = backoff.delay(3);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_fixed_and_none_backoff() {
        assert_eq!(BackoffPolicy::None.delay(4), Duration::ZERO);
        assert_eq!(
            BackoffPolicy::Fixed { delay_ms: 25 }.delay(9),
            Duration::from_millis(25)
        );
    }

    #[test]
    fn test_policy_method_and_status() {
        let p = policy(0, 1, &[503]);
        assert!(p.can_retry_method(&Method::GET));
        assert!(!p.can_retry_method(&Method::POST));
        assert!(p.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!p.is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));

        let all = ConfiguredRetryPolicy::new(RetryConfig {
            retry_on_all_methods: true,
            ..Default::default()
        });
        assert!(all.can_retry_method(&Method::POST));
    }

    #[test]
    fn test_success_returns() {
        let mut ctx = context_with_endpoint();
        let decision = ctx.evaluate(
            &policy(1, 1, &[503]),
            &Method::GET,
            &uri(),
            Ok(TransportResponse::new(StatusCode::OK)),
        );
        assert!(matches!(decision, RetryDecision::Return(r) if r.status() == StatusCode::OK));
        assert_eq!(ctx.same_endpoint_retries(), 0);
    }

    #[test]
    fn test_permanent_error_fails_immediately() {
        let mut ctx = context_with_endpoint();
        let decision = ctx.evaluate(
            &policy(3, 3, &[]),
            &Method::GET,
            &uri(),
            Err(TransportError::Other {
                reason: "malformed status line".to_string(),
            }),
        );
        assert!(matches!(decision, RetryDecision::Fail(TransportError::Other { .. })));
    }

    #[test]
    fn test_same_endpoint_then_next_endpoint() {
        let p = policy(1, 1, &[]);
        let mut ctx = context_with_endpoint();

        let first = ctx.evaluate(&p, &Method::GET, &uri(), Err(TransportError::ConnectionReset));
        assert!(matches!(
            first,
            RetryDecision::Retry {
                target: RetryTarget::SameEndpoint,
                ..
            }
        ));
        assert_eq!(ctx.endpoint_to_reuse().map(|e| e.endpoint_id()), Some("a"));

        ctx.select_endpoint(ServiceEndpoint::new("a", "svc", "10.0.0.1", 80));
        ctx.record_attempt();
        let second = ctx.evaluate(&p, &Method::GET, &uri(), Err(TransportError::ConnectionReset));
        assert!(matches!(
            second,
            RetryDecision::Retry {
                target: RetryTarget::NextEndpoint,
                ..
            }
        ));
        assert_eq!(ctx.same_endpoint_retries(), 0);
        assert_eq!(ctx.next_endpoint_retries(), 1);
        assert!(ctx.endpoint_to_reuse().is_none());

        ctx.select_endpoint(ServiceEndpoint::new("b", "svc", "10.0.0.2", 80));
        ctx.record_attempt();
        let third = ctx.evaluate(&p, &Method::GET, &uri(), Err(TransportError::ConnectionReset));
        assert!(matches!(
            third,
            RetryDecision::Retry {
                target: RetryTarget::SameEndpoint,
                ..
            }
        ));

        ctx.select_endpoint(ServiceEndpoint::new("b", "svc", "10.0.0.2", 80));
        ctx.record_attempt();
        let fourth = ctx.evaluate(&p, &Method::GET, &uri(), Err(TransportError::ConnectionReset));
        assert!(matches!(
            fourth,
            RetryDecision::Fail(TransportError::ConnectionReset)
        ));
        assert_eq!(ctx.attempts(), 4);
    }

    #[test]
    fn test_exhausted_status_returns_response() {
        let p = policy(0, 0, &[503]);
        let mut ctx = context_with_endpoint();
        let decision = ctx.evaluate(
            &p,
            &Method::GET,
            &uri(),
            Ok(TransportResponse::new(StatusCode::SERVICE_UNAVAILABLE).with_body("busy")),
        );
        match decision {
            RetryDecision::Return(response) => {
                assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(response.body_bytes().unwrap().as_ref(), b"busy");
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_status_reason_carries_endpoint_and_uri() {
        let p = policy(1, 0, &[503]);
        let mut ctx = context_with_endpoint();
        let decision = ctx.evaluate(
            &p,
            &Method::GET,
            &uri(),
            Ok(TransportResponse::new(StatusCode::SERVICE_UNAVAILABLE)),
        );
        match decision {
            RetryDecision::Retry { reason, .. } => {
                assert_eq!(
                    reason.to_string(),
                    "retryable status 503 from http://10.0.0.1:80/x (a@10.0.0.1:80)"
                );
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_non_get_not_retried() {
        let p = policy(2, 2, &[]);
        let mut ctx = context_with_endpoint();
        let reset = Err(TransportError::ConnectionReset);
        let decision = ctx.evaluate(&p, &Method::POST, &uri(), reset);
        assert!(matches!(
            decision,
            RetryDecision::Fail(TransportError::ConnectionReset)
        ));
        assert_eq!(ctx.same_endpoint_retries(), 0);
    }

    #[test]
    fn test_backoff_config_serde() {
        let json = r#"{"type":"exponential","initial_ms":50,"multiplier":3.0,
            "max_ms":1000,"jitter":false}"#;
        let backoff: BackoffPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(backoff.delay(1), Duration::from_millis(150));

        let fixed: BackoffPolicy =
            serde_json::from_str(r#"{"type":"fixed","delay_ms":7}"#).unwrap();
        assert_eq!(fixed, BackoffPolicy::Fixed { delay_ms: 7 });
    }
}
