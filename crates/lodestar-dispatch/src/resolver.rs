//! Instance resolution: mapping a service name to one endpoint.
//!
//! The dispatchers consult an [`InstanceResolver`] once per attempt. Returning
//! `None` is not an error; it means no endpoint is known to be available right
//! now and the dispatcher falls back according to its resolution-miss policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::{HeaderMap, Method, Uri};

use crate::endpoint::ServiceEndpoint;
use crate::request::OutboundRequest;

/// Request data exposed to resolvers and lifecycle listeners.
#[derive(Debug, Clone)]
pub struct RequestContext {
    service_name: String,
    hint: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    previous_endpoint: Option<ServiceEndpoint>,
}

impl RequestContext {
    /// Captures the parts of `request` a resolver may route on.
    pub fn new(request: &OutboundRequest, service_name: &str, hint: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            hint: hint.to_string(),
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            previous_endpoint: None,
        }
    }

    /// Records the endpoint used by the prior attempt of the same call.
    pub fn with_previous_endpoint(mut self, previous: Option<ServiceEndpoint>) -> Self {
        self.previous_endpoint = previous;
        self
    }

    /// Service being resolved.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Correlation hint configured for the service.
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Method of the original request.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The original, service-addressed URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Headers of the original request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Endpoint chosen for the previous attempt, if any.
    pub fn previous_endpoint(&self) -> Option<&ServiceEndpoint> {
        self.previous_endpoint.as_ref()
    }
}

/// Chooses an endpoint for a service.
pub trait InstanceResolver: Send + Sync {
    /// Returns an endpoint for `service_name`, or `None` if none is available.
    ///
    /// May be called several times within one logical call and may return a
    /// different endpoint each time.
    fn choose(&self, service_name: &str, context: &RequestContext) -> Option<ServiceEndpoint>;
}

impl<F> InstanceResolver for F
where
    F: Fn(&str, &RequestContext) -> Option<ServiceEndpoint> + Send + Sync,
{
    fn choose(&self, service_name: &str, context: &RequestContext) -> Option<ServiceEndpoint> {
        self(service_name, context)
    }
}

struct ServicePool {
    endpoints: Vec<ServiceEndpoint>,
    cursor: AtomicUsize,
}

/// Round-robin resolver over a fixed endpoint list per service.
///
/// When the context names a previous endpoint and the service has more than
/// one endpoint, the previous one is skipped so a retry lands elsewhere.
#[derive(Default)]
pub struct StaticResolver {
    pools: HashMap<String, ServicePool>,
}

impl StaticResolver {
    /// Creates a resolver with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint under its service name.
    pub fn with_endpoint(mut self, endpoint: ServiceEndpoint) -> Self {
        self.pools
            .entry(endpoint.service_name().to_string())
            .or_insert_with(|| ServicePool {
                endpoints: Vec::new(),
                cursor: AtomicUsize::new(0),
            })
            .endpoints
            .push(endpoint);
        self
    }

    /// Number of endpoints registered for `service_name`.
    pub fn endpoint_count(&self, service_name: &str) -> usize {
        self.pools
            .get(service_name)
            .map(|pool| pool.endpoints.len())
            .unwrap_or(0)
    }
}

impl InstanceResolver for StaticResolver {
    fn choose(&self, service_name: &str, context: &RequestContext) -> Option<ServiceEndpoint> {
        let pool = self.pools.get(service_name)?;
        let len = pool.endpoints.len();
        if len == 0 {
            return None;
        }

        let mut index = pool.cursor.fetch_add(1, Ordering::Relaxed) % len;
        if len > 1 && context.previous_endpoint() == Some(&pool.endpoints[index]) {
            index = pool.cursor.fetch_add(1, Ordering::Relaxed) % len;
        }
        Some(pool.endpoints[index].clone())
    }
}

impl std::fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (service, pool) in &self.pools {
            map.entry(service, &pool.endpoints.len());
        }
        map.finish()
    }
}
