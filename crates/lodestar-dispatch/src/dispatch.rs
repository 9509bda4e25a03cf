//! Collaborators and steps shared by both dispatchers.

use std::sync::Arc;

use http::StatusCode;
use tracing::warn;

use crate::config::{HintConfig, ResolutionMissPolicy};
use crate::endpoint::ServiceEndpoint;
use crate::error::{DispatchError, Result};
use crate::lifecycle::{CompletionRecord, LifecycleNotifier, ListenerRegistry, ListenerSource};
use crate::request::{OutboundRequest, RequestOptions};
use crate::resolver::{InstanceResolver, RequestContext};
use crate::response::TransportResponse;
use crate::transformer::TransformerChain;
use crate::transport::Transport;
use crate::uri::{EndpointUriReconstructor, UriReconstructor};

/// Executes a service-addressed request.
pub trait Dispatch: Send + Sync {
    /// Resolves, transforms and sends `request`.
    ///
    /// # Errors
    /// * [`DispatchError::IllegalRequest`] if the URI names no service; raised
    ///   before the resolver or transport is touched.
    /// * [`DispatchError::Transport`] if the final transport attempt failed.
    fn execute(&self, request: OutboundRequest, options: &RequestOptions)
        -> Result<TransportResponse>;
}

/// Read-only collaborators of a dispatcher.
///
/// Cloning is cheap; every collaborator is shared behind an `Arc`.
#[derive(Clone)]
pub struct DispatchCore {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn InstanceResolver>,
    reconstructor: Arc<dyn UriReconstructor>,
    transformers: TransformerChain,
    listeners: Arc<dyn ListenerSource>,
    hints: HintConfig,
    miss_policy: ResolutionMissPolicy,
}

impl DispatchCore {
    /// Core with the default URI reconstructor, no transformers, no listeners
    /// and default hints.
    pub fn new(transport: Arc<dyn Transport>, resolver: Arc<dyn InstanceResolver>) -> Self {
        Self {
            transport,
            resolver,
            reconstructor: Arc::new(EndpointUriReconstructor),
            transformers: TransformerChain::new(),
            listeners: Arc::new(ListenerRegistry::new()),
            hints: HintConfig::default(),
            miss_policy: ResolutionMissPolicy::default(),
        }
    }

    /// Replaces the URI reconstructor.
    pub fn with_reconstructor(mut self, reconstructor: Arc<dyn UriReconstructor>) -> Self {
        self.reconstructor = reconstructor;
        self
    }

    /// Replaces the transformer chain.
    pub fn with_transformers(mut self, transformers: TransformerChain) -> Self {
        self.transformers = transformers;
        self
    }

    /// Replaces the listener source.
    pub fn with_listeners(mut self, listeners: Arc<dyn ListenerSource>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Sets the per-service hints.
    pub fn with_hints(mut self, hints: HintConfig) -> Self {
        self.hints = hints;
        self
    }

    /// Sets the behaviour on a resolver miss.
    pub fn with_miss_policy(mut self, miss_policy: ResolutionMissPolicy) -> Self {
        self.miss_policy = miss_policy;
        self
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn resolver(&self) -> &dyn InstanceResolver {
        self.resolver.as_ref()
    }

    /// Validates the request and opens its lifecycle.
    ///
    /// Returns the service name, the request context and the notifier after
    /// `on_start` has been delivered.
    pub(crate) fn begin(
        &self,
        request: &OutboundRequest,
    ) -> Result<(String, RequestContext, LifecycleNotifier)> {
        let service = service_name(request)?.to_string();
        let context = RequestContext::new(request, &service, self.hints.hint_for(&service));
        let notifier = LifecycleNotifier::for_service(self.listeners.as_ref(), &service);
        notifier.start(&context);
        Ok((service, context, notifier))
    }

    /// Rewrites the URI for `endpoint` and applies the transformer chain.
    pub(crate) fn prepare(
        &self,
        request: &OutboundRequest,
        endpoint: &ServiceEndpoint,
    ) -> Result<OutboundRequest> {
        let uri = self.reconstructor.reconstruct(endpoint, request.uri())?;
        let rewritten = request.clone().with_uri(uri);
        Ok(self.transformers.apply(rewritten, endpoint))
    }

    /// Handles a resolver miss: reports DISCARDED, then applies the miss policy.
    pub(crate) fn resolution_miss(
        &self,
        notifier: LifecycleNotifier,
        context: RequestContext,
        request: &OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        let service = context.service_name().to_string();
        warn!(service = %service, "no endpoint available");
        notifier.complete(CompletionRecord::discarded(context));

        match self.miss_policy {
            ResolutionMissPolicy::ExecuteOriginal => {
                Ok(self.transport.execute(request, options)?)
            }
            ResolutionMissPolicy::ServiceUnavailable => Ok(service_unavailable(&service)),
        }
    }
}

impl std::fmt::Debug for DispatchCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCore")
            .field("transformers", &self.transformers)
            .field("hints", &self.hints)
            .field("miss_policy", &self.miss_policy)
            .finish()
    }
}

/// Extracts the service name from the request URI host.
pub fn service_name(request: &OutboundRequest) -> Result<&str> {
    request
        .service_name()
        .ok_or_else(|| DispatchError::IllegalRequest {
            uri: request.uri().to_string(),
        })
}

/// Synthetic response returned under [`ResolutionMissPolicy::ServiceUnavailable`].
pub fn service_unavailable(service: &str) -> TransportResponse {
    TransportResponse::new(StatusCode::SERVICE_UNAVAILABLE).with_body(format!(
        "Load balancer does not contain an instance for the service {}",
        service
    ))
}
