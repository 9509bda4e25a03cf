//! Retrying dispatch.
//!
//! One logical call runs the loop `resolve -> transform -> execute -> evaluate`
//! on the calling thread until the [`RetryContext`] decides to return or fail.
//! Each response body is buffered as soon as it arrives and the transport
//! stream is dropped before the retry decision, so a response kept for a
//! later "retries exhausted" return is still fully readable.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::dispatch::{Dispatch, DispatchCore};
use crate::endpoint::ServiceEndpoint;
use crate::error::{DispatchError, Result, TransportError};
use crate::lifecycle::{CompletionRecord, LifecycleNotifier};
use crate::request::{OutboundRequest, RequestOptions};
use crate::resolver::RequestContext;
use crate::response::TransportResponse;
use crate::retry::{RetryContext, RetryDecision, RetryPolicy, RetryReason, Sleeper, ThreadSleeper};

/// Dispatcher that retries transport failures and retryable statuses.
#[derive(Clone)]
pub struct RetryingDispatcher {
    core: DispatchCore,
    policy: Arc<dyn RetryPolicy>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryingDispatcher {
    /// Creates a dispatcher over `core` governed by `policy`.
    pub fn new(core: DispatchCore, policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            core,
            policy,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replaces the sleeper used for backoff delays.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn resolve(
        &self,
        service: &str,
        context: &RequestContext,
        retry: &RetryContext,
    ) -> Option<ServiceEndpoint> {
        if let Some(endpoint) = retry.endpoint_to_reuse() {
            return Some(endpoint.clone());
        }
        let hinted = context
            .clone()
            .with_previous_endpoint(retry.endpoint().cloned());
        self.core.resolver().choose(service, &hinted)
    }

    fn attempt(
        &self,
        outbound: &OutboundRequest,
        options: &RequestOptions,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let response = self.core.transport().execute(outbound, options)?;
        Ok(response.buffered()?)
    }

    fn finish(
        notifier: LifecycleNotifier,
        context: RequestContext,
        retry: &RetryContext,
        started: Instant,
        outcome: std::result::Result<TransportResponse, TransportError>,
    ) -> Result<TransportResponse> {
        let endpoint = retry.endpoint().cloned();
        match outcome {
            Ok(response) => {
                notifier.complete(CompletionRecord::success(
                    context,
                    endpoint,
                    &response,
                    retry.attempts(),
                    started.elapsed(),
                ));
                Ok(response)
            }
            Err(e) => {
                let error = DispatchError::from(e);
                notifier.complete(CompletionRecord::failed(
                    context,
                    endpoint,
                    &error,
                    retry.attempts(),
                    started.elapsed(),
                ));
                Err(error)
            }
        }
    }
}

impl Dispatch for RetryingDispatcher {
    fn execute(
        &self,
        request: OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        let (service, context, notifier) = self.core.begin(&request)?;
        let started = Instant::now();
        let mut retry = RetryContext::new();
        let mut pending: Option<RetryReason> = None;

        loop {
            let Some(endpoint) = self.resolve(&service, &context, &retry) else {
                return match pending.take() {
                    None => self
                        .core
                        .resolution_miss(notifier, context, &request, options),
                    Some(reason) => {
                        warn!(
                            service = %service,
                            attempts = retry.attempts(),
                            "no endpoint for retry, returning last outcome"
                        );
                        Self::finish(notifier, context, &retry, started, reason.into_outcome())
                    }
                };
            };
            retry.select_endpoint(endpoint.clone());

            let outbound = match self.core.prepare(&request, &endpoint) {
                Ok(outbound) => outbound,
                Err(e) => {
                    notifier.complete(CompletionRecord::failed(
                        context,
                        Some(endpoint),
                        &e,
                        retry.attempts(),
                        started.elapsed(),
                    ));
                    return Err(e);
                }
            };

            let attempt_context = context
                .clone()
                .with_previous_endpoint(retry.previous_endpoint().cloned());
            notifier.start_request(&attempt_context, Some(&endpoint));
            retry.record_attempt();
            debug!(
                service = %service,
                endpoint = %endpoint,
                attempt = retry.attempts(),
                uri = %outbound.uri(),
                "sending request"
            );

            let outcome = self.attempt(&outbound, options);
            match retry.evaluate(self.policy.as_ref(), request.method(), outbound.uri(), outcome) {
                RetryDecision::Return(response) => {
                    return Self::finish(notifier, context, &retry, started, Ok(response));
                }
                RetryDecision::Fail(error) => {
                    return Self::finish(notifier, context, &retry, started, Err(error));
                }
                RetryDecision::Retry { target, reason } => {
                    let delay = self.policy.backoff_delay(retry.attempts() - 1);
                    debug!(
                        service = %service,
                        attempt = retry.attempts(),
                        target = ?target,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "retrying request"
                    );
                    if !delay.is_zero() {
                        self.sleeper.sleep(delay);
                    }
                    pending = Some(reason);
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingDispatcher")
            .field("core", &self.core)
            .finish()
    }
}
