//! Common fakes and fixtures for dispatch integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use lodestar_dispatch::{
    CompletionRecord, CompletionStatus, InstanceResolver, LifecycleListener, ListenerError,
    OutboundRequest, RequestContext, RequestOptions, ServiceEndpoint, Sleeper, Transport,
    TransportError, TransportResponse,
};

/// Installs a fmt subscriber that writes through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transport that replays a script of outcomes, then a fallback response.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    fallback_status: StatusCode,
    fallback_body: &'static str,
    requests: Mutex<Vec<OutboundRequest>>,
    options: Mutex<Vec<RequestOptions>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback_status: StatusCode::OK,
            fallback_body: "ok",
            requests: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        })
    }

    /// Answers every call with `status` and `body`.
    pub fn always(status: StatusCode, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback_status: status,
            fallback_body: body,
            requests: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Options passed to each call, in call order.
    pub fn options(&self) -> Vec<RequestOptions> {
        self.options.lock().unwrap().clone()
    }

    pub fn uris(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.uri().to_string())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: &OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.options.lock().unwrap().push(*options);
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(TransportResponse::new(self.fallback_status).with_body(self.fallback_body))
        })
    }
}

/// Resolver that cycles through a fixed endpoint list and records every call.
pub struct FixedResolver {
    endpoints: Vec<ServiceEndpoint>,
    next: AtomicUsize,
    calls: AtomicU32,
    previous: Mutex<Vec<Option<String>>>,
}

impl FixedResolver {
    pub fn new(endpoints: Vec<ServiceEndpoint>) -> Arc<Self> {
        Arc::new(Self {
            endpoints,
            next: AtomicUsize::new(0),
            calls: AtomicU32::new(0),
            previous: Mutex::new(Vec::new()),
        })
    }

    /// Resolver that never finds an endpoint.
    pub fn none() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn single(host: &str, port: u16) -> Arc<Self> {
        Self::new(vec![ServiceEndpoint::new("ep-1", "svc", host, port)])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids of the previous endpoint passed in each resolver call.
    pub fn previous_ids(&self) -> Vec<Option<String>> {
        self.previous.lock().unwrap().clone()
    }
}

impl InstanceResolver for FixedResolver {
    fn choose(&self, _service_name: &str, context: &RequestContext) -> Option<ServiceEndpoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.previous.lock().unwrap().push(
            context
                .previous_endpoint()
                .map(|e| e.endpoint_id().to_string()),
        );
        if self.endpoints.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::SeqCst) % self.endpoints.len();
        Some(self.endpoints[i].clone())
    }
}

/// One observed lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start { service: String, hint: String },
    StartRequest { endpoint: Option<String> },
    Complete { status: CompletionStatus, attempts: u32 },
}

/// Listener that records every notification in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    records: Mutex<Vec<CompletionRecord>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl LifecycleListener for RecordingListener {
    fn on_start(&self, context: &RequestContext) -> Result<(), ListenerError> {
        self.events.lock().unwrap().push(Event::Start {
            service: context.service_name().to_string(),
            hint: context.hint().to_string(),
        });
        Ok(())
    }

    fn on_start_request(
        &self,
        _context: &RequestContext,
        selected: Option<&ServiceEndpoint>,
    ) -> Result<(), ListenerError> {
        self.events.lock().unwrap().push(Event::StartRequest {
            endpoint: selected.map(|e| e.endpoint_id().to_string()),
        });
        Ok(())
    }

    fn on_complete(&self, record: &CompletionRecord) -> Result<(), ListenerError> {
        self.events.lock().unwrap().push(Event::Complete {
            status: record.status(),
            attempts: record.attempts(),
        });
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Listener whose every callback fails.
pub struct FailingListener;

impl LifecycleListener for FailingListener {
    fn on_start(&self, _context: &RequestContext) -> Result<(), ListenerError> {
        Err("start rejected".into())
    }

    fn on_complete(&self, _record: &CompletionRecord) -> Result<(), ListenerError> {
        Err("complete rejected".into())
    }
}

/// Listener whose every callback panics.
pub struct PanickingListener;

impl LifecycleListener for PanickingListener {
    fn on_start(&self, _context: &RequestContext) -> Result<(), ListenerError> {
        panic!("listener panic in on_start");
    }

    fn on_start_request(
        &self,
        _context: &RequestContext,
        _selected: Option<&ServiceEndpoint>,
    ) -> Result<(), ListenerError> {
        panic!("listener panic in on_start_request");
    }

    fn on_complete(&self, _record: &CompletionRecord) -> Result<(), ListenerError> {
        panic!("listener panic in on_complete");
    }
}

/// Sleeper that records requested delays instead of blocking.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
