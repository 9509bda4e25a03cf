//! Lifecycle notifications for dispatched calls.
//!
//! Every logical call produces, in order:
//! - one `on_start` before the first resolution,
//! - one `on_start_request` before each transport attempt,
//! - exactly one `on_complete` carrying a [`CompletionRecord`].
//!
//! Listener failures (errors or panics) are logged and never change the
//! outcome of the call or stop delivery to the remaining listeners.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::endpoint::ServiceEndpoint;
use crate::error::{DispatchError, ListenerError};
use crate::resolver::RequestContext;
use crate::response::TransportResponse;

/// How a logical call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompletionStatus {
    /// A response was returned to the caller.
    Success,
    /// An error was returned to the caller.
    Failed,
    /// No endpoint could be resolved; the load-balanced path was skipped.
    Discarded,
}

/// Status line and headers of the response handed back to the caller.
#[derive(Debug, Clone)]
pub struct ResponseSummary {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ResponseSummary {
    /// Summarizes a response without touching its body.
    pub fn of(response: &TransportResponse) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
        }
    }
}

/// Normalized outcome attached to SUCCESS and FAILED records.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// The call returned this response.
    Response(ResponseSummary),
    /// The call failed with this error message.
    Error(String),
}

/// Final record of one logical call.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    status: CompletionStatus,
    context: RequestContext,
    endpoint: Option<ServiceEndpoint>,
    outcome: Option<CompletionOutcome>,
    attempts: u32,
    elapsed: Duration,
}

impl CompletionRecord {
    /// Record for a call that returned `response`.
    pub fn success(
        context: RequestContext,
        endpoint: Option<ServiceEndpoint>,
        response: &TransportResponse,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: CompletionStatus::Success,
            context,
            endpoint,
            outcome: Some(CompletionOutcome::Response(ResponseSummary::of(response))),
            attempts,
            elapsed,
        }
    }

    /// Record for a call that failed with `error`.
    pub fn failed(
        context: RequestContext,
        endpoint: Option<ServiceEndpoint>,
        error: &DispatchError,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: CompletionStatus::Failed,
            context,
            endpoint,
            outcome: Some(CompletionOutcome::Error(error.to_string())),
            attempts,
            elapsed,
        }
    }

    /// Record for a call whose service name resolved to no endpoint.
    pub fn discarded(context: RequestContext) -> Self {
        Self {
            status: CompletionStatus::Discarded,
            context,
            endpoint: None,
            outcome: None,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// How the call ended.
    pub fn status(&self) -> CompletionStatus {
        self.status
    }

    /// Context of the call.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Endpoint used by the final attempt.
    pub fn endpoint(&self) -> Option<&ServiceEndpoint> {
        self.endpoint.as_ref()
    }

    /// Response summary or error; `None` for DISCARDED.
    pub fn outcome(&self) -> Option<&CompletionOutcome> {
        self.outcome.as_ref()
    }

    /// Number of load-balanced transport attempts made.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wall-clock time from start notification to completion.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Observer of dispatch lifecycle events.
///
/// All methods default to doing nothing so listeners implement only what they
/// need.
pub trait LifecycleListener: Send + Sync {
    /// Called once per logical call, before the first resolution.
    fn on_start(&self, _context: &RequestContext) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called before each transport attempt with the endpoint selected for it.
    fn on_start_request(
        &self,
        _context: &RequestContext,
        _selected: Option<&ServiceEndpoint>,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Called exactly once when the logical call ends.
    fn on_complete(&self, _record: &CompletionRecord) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Supplies the listeners interested in a service.
pub trait ListenerSource: Send + Sync {
    /// Listeners to notify for calls to `service_name`.
    fn listeners_for(&self, service_name: &str) -> Vec<Arc<dyn LifecycleListener>>;
}

/// Listeners registered globally and per service.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    global: Vec<Arc<dyn LifecycleListener>>,
    per_service: HashMap<String, Vec<Arc<dyn LifecycleListener>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for every service.
    pub fn with_global(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.global.push(listener);
        self
    }

    /// Registers a listener for one service.
    pub fn with_service(
        mut self,
        service_name: impl Into<String>,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        self.per_service
            .entry(service_name.into())
            .or_default()
            .push(listener);
        self
    }
}

impl ListenerSource for ListenerRegistry {
    fn listeners_for(&self, service_name: &str) -> Vec<Arc<dyn LifecycleListener>> {
        let mut listeners = self.global.clone();
        if let Some(specific) = self.per_service.get(service_name) {
            listeners.extend(specific.iter().cloned());
        }
        listeners
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("global", &self.global.len())
            .field("services", &self.per_service.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-call fan-out to the listeners of one service.
///
/// [`complete`](Self::complete) consumes the notifier, so a call cannot report
/// completion twice.
pub struct LifecycleNotifier {
    service_name: String,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl LifecycleNotifier {
    /// Resolves the listeners for `service_name` from `source`.
    pub fn for_service(source: &dyn ListenerSource, service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            listeners: source.listeners_for(service_name),
        }
    }

    /// Number of listeners this notifier delivers to.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers `on_start`.
    pub fn start(&self, context: &RequestContext) {
        self.each("start", |l| l.on_start(context));
    }

    /// Delivers `on_start_request`.
    pub fn start_request(&self, context: &RequestContext, selected: Option<&ServiceEndpoint>) {
        self.each("start_request", |l| l.on_start_request(context, selected));
    }

    /// Delivers `on_complete` and ends the call.
    pub fn complete(self, record: CompletionRecord) {
        debug!(
            service = %self.service_name,
            status = ?record.status(),
            attempts = record.attempts(),
            "call completed"
        );
        self.each("complete", |l| l.on_complete(&record));
    }

    fn each<F>(&self, stage: &'static str, notify: F)
    where
        F: Fn(&dyn LifecycleListener) -> Result<(), ListenerError>,
    {
        for listener in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    service = %self.service_name,
                    stage,
                    error = %e,
                    "lifecycle listener failed"
                ),
                Err(_) => warn!(
                    service = %self.service_name,
                    stage,
                    "lifecycle listener panicked"
                ),
            }
        }
    }
}

impl std::fmt::Debug for LifecycleNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleNotifier")
            .field("service_name", &self.service_name)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Logs every notification through `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl LifecycleListener for TracingListener {
    fn on_start(&self, context: &RequestContext) -> Result<(), ListenerError> {
        debug!(
            service = context.service_name(),
            hint = context.hint(),
            method = %context.method(),
            uri = %context.uri(),
            "dispatch started"
        );
        Ok(())
    }

    fn on_start_request(
        &self,
        context: &RequestContext,
        selected: Option<&ServiceEndpoint>,
    ) -> Result<(), ListenerError> {
        debug!(
            service = context.service_name(),
            hint = context.hint(),
            endpoint = ?selected.map(|e| e.to_string()),
            "attempt started"
        );
        Ok(())
    }

    fn on_complete(&self, record: &CompletionRecord) -> Result<(), ListenerError> {
        let status = match record.outcome() {
            Some(CompletionOutcome::Response(summary)) => Some(summary.status.as_u16()),
            _ => None,
        };
        debug!(
            service = record.context().service_name(),
            hint = record.context().hint(),
            outcome = ?record.status(),
            status = ?status,
            attempts = record.attempts(),
            elapsed_ms = record.elapsed().as_millis() as u64,
            "dispatch completed"
        );
        Ok(())
    }
}
