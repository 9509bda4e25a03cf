//! High-level `DispatchClient` that composes the dispatch modules.
//!
//! The client owns one non-retrying dispatcher and one retrying dispatcher per
//! distinct retry configuration, and picks between them per call from the
//! service's `retry_enabled` setting.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::DispatchConfig;
use crate::direct::DirectDispatcher;
use crate::dispatch::{self, Dispatch, DispatchCore};
use crate::error::{DispatchError, Result};
use crate::lifecycle::ListenerSource;
use crate::request::{OutboundRequest, RequestOptions};
use crate::resolver::InstanceResolver;
use crate::response::TransportResponse;
use crate::retry::{ConfiguredRetryPolicy, RetryPolicy, Sleeper, ThreadSleeper};
use crate::retrying::RetryingDispatcher;
use crate::transformer::{RequestTransformer, TransformerChain};
use crate::transport::Transport;
use crate::uri::UriReconstructor;

/// Assembles a [`DispatchClient`].
///
/// A transport and a resolver are required; everything else has a default.
pub struct DispatchClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn InstanceResolver>>,
    config: DispatchConfig,
    transformers: Vec<Arc<dyn RequestTransformer>>,
    listeners: Option<Arc<dyn ListenerSource>>,
    reconstructor: Option<Arc<dyn UriReconstructor>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for DispatchClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchClientBuilder {
    /// Starts a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            transport: None,
            resolver: None,
            config: DispatchConfig::default(),
            transformers: Vec::new(),
            listeners: None,
            reconstructor: None,
            retry_policy: None,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Sets the transport (required).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the instance resolver (required).
    pub fn resolver(mut self, resolver: Arc<dyn InstanceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds one transformer to the chain.
    pub fn transformer(mut self, transformer: Arc<dyn RequestTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Sets the lifecycle listener source.
    pub fn listeners(mut self, listeners: Arc<dyn ListenerSource>) -> Self {
        self.listeners = Some(listeners);
        self
    }

    /// Replaces the default URI reconstructor.
    pub fn reconstructor(mut self, reconstructor: Arc<dyn UriReconstructor>) -> Self {
        self.reconstructor = Some(reconstructor);
        self
    }

    /// Replaces the policy built from the global retry settings. Services with
    /// their own `retry` section keep a policy built from that section.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Replaces the sleeper used for backoff delays.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    /// [`DispatchError::Config`] if no transport or no resolver was supplied.
    pub fn build(self) -> Result<DispatchClient> {
        let transport = self.transport.ok_or_else(|| DispatchError::Config {
            reason: "no transport configured".to_string(),
        })?;
        let resolver = self.resolver.ok_or_else(|| DispatchError::Config {
            reason: "no resolver configured".to_string(),
        })?;

        let mut core = DispatchCore::new(transport, resolver)
            .with_transformers(TransformerChain::from_transformers(self.transformers))
            .with_hints(self.config.hints.clone())
            .with_miss_policy(self.config.on_resolution_miss);
        if let Some(listeners) = self.listeners {
            core = core.with_listeners(listeners);
        }
        if let Some(reconstructor) = self.reconstructor {
            core = core.with_reconstructor(reconstructor);
        }

        let default_policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(ConfiguredRetryPolicy::new(self.config.retry.clone())),
        };
        let retrying = RetryingDispatcher::new(core.clone(), default_policy)
            .with_sleeper(Arc::clone(&self.sleeper));

        let per_service = self
            .config
            .services
            .iter()
            .filter_map(|(name, service)| {
                let retry = service.retry.as_ref()?;
                let policy = Arc::new(ConfiguredRetryPolicy::new(retry.clone()));
                let dispatcher = RetryingDispatcher::new(core.clone(), policy)
                    .with_sleeper(Arc::clone(&self.sleeper));
                Some((name.clone(), dispatcher))
            })
            .collect::<HashMap<_, _>>();

        debug!(
            retry_enabled = self.config.retry_enabled,
            service_overrides = per_service.len(),
            "dispatch client built"
        );

        Ok(DispatchClient {
            options: self.config.request_options(),
            config: self.config,
            direct: DirectDispatcher::new(core),
            retrying,
            per_service,
        })
    }
}

/// Entry point for service-addressed calls.
///
/// ```ignore
/// let client = DispatchClient::builder()
///     .transport(transport)
///     .resolver(Arc::new(resolver))
///     .build()?;
/// let response = client.execute(OutboundRequest::get("http://billing/invoices/7")?)?;
/// ```
pub struct DispatchClient {
    config: DispatchConfig,
    options: RequestOptions,
    direct: DirectDispatcher,
    retrying: RetryingDispatcher,
    per_service: HashMap<String, RetryingDispatcher>,
}

impl DispatchClient {
    /// Starts a [`DispatchClientBuilder`].
    pub fn builder() -> DispatchClientBuilder {
        DispatchClientBuilder::new()
    }

    /// Configuration the client was built from.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Sends `request` with the configured timeouts.
    pub fn execute(&self, request: OutboundRequest) -> Result<TransportResponse> {
        self.execute_with_options(request, &self.options)
    }

    /// Sends `request` with explicit per-attempt options.
    pub fn execute_with_options(
        &self,
        request: OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        let service = dispatch::service_name(&request)?;
        if self.config.retry_enabled_for(service) {
            let dispatcher = self.per_service.get(service).unwrap_or(&self.retrying);
            dispatcher.execute(request, options)
        } else {
            self.direct.execute(request, options)
        }
    }
}

impl Dispatch for DispatchClient {
    fn execute(
        &self,
        request: OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        self.execute_with_options(request, options)
    }
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("config", &self.config)
            .field("service_overrides", &self.per_service.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::endpoint::ServiceEndpoint;
    use crate::error::TransportError;
    use crate::resolver::StaticResolver;
    use crate::retry::RetryConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing_transport(calls: Arc<AtomicU32>) -> Arc<dyn Transport> {
        Arc::new(move |_: &OutboundRequest, _: &RequestOptions| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<TransportResponse, _>(TransportError::ConnectionReset)
        })
    }

    fn resolver() -> Arc<StaticResolver> {
        Arc::new(
            StaticResolver::new()
                .with_endpoint(ServiceEndpoint::new("a", "billing", "10.0.0.1", 80))
                .with_endpoint(ServiceEndpoint::new("b", "billing", "10.0.0.2", 80))
                .with_endpoint(ServiceEndpoint::new("c", "orders", "10.0.1.1", 80)),
        )
    }

    #[test]
    fn test_build_requires_transport() {
        let err = DispatchClient::builder()
            .resolver(resolver())
            .build()
            .unwrap_err();
        assert!(matches!(err, DispatchError::Config { reason } if reason.contains("transport")));
    }

    #[test]
    fn test_build_requires_resolver() {
        let err = DispatchClient::builder()
            .transport(failing_transport(Arc::new(AtomicU32::new(0))))
            .build()
            .unwrap_err();
        assert!(matches!(err, DispatchError::Config { reason } if reason.contains("resolver")));
    }

    #[test]
    fn test_routes_by_retry_enabled() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut config = DispatchConfig::default();
        config.services.insert(
            "orders".to_string(),
            ServiceConfig {
                retry_enabled: Some(false),
                retry: None,
            },
        );
        let client = DispatchClient::builder()
            .transport(failing_transport(Arc::clone(&calls)))
            .resolver(resolver())
            .config(config)
            .build()
            .unwrap();

        assert!(client
            .execute(OutboundRequest::get("http://billing/").unwrap())
            .is_err());
        assert_eq!(calls.swap(0, Ordering::SeqCst), 2);

        assert!(client
            .execute(OutboundRequest::get("http://orders/").unwrap())
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_per_service_retry_override() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut config = DispatchConfig::default();
        config.services.insert(
            "billing".to_string(),
            ServiceConfig {
                retry_enabled: None,
                retry: Some(RetryConfig {
                    max_retries_same_endpoint: 2,
                    max_retries_next_endpoint: 1,
                    ..Default::default()
                }),
            },
        );
        let client = DispatchClient::builder()
            .transport(failing_transport(Arc::clone(&calls)))
            .resolver(resolver())
            .config(config)
            .build()
            .unwrap();

        assert!(client
            .execute(OutboundRequest::get("http://billing/").unwrap())
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_illegal_request_before_routing() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = DispatchClient::builder()
            .transport(failing_transport(Arc::clone(&calls)))
            .resolver(resolver())
            .build()
            .unwrap();

        let err = client
            .execute(OutboundRequest::get("/relative").unwrap())
            .unwrap_err();
        assert!(matches!(err, DispatchError::IllegalRequest { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
