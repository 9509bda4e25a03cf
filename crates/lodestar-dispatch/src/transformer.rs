//! Request transformers applied once an endpoint has been chosen.
//!
//! The chain is a left fold: each transformer receives the output of the one
//! before it. Transformers are sorted by [`RequestTransformer::order`]; equal
//! orders keep registration order.

use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use tracing::warn;

use crate::endpoint::ServiceEndpoint;
use crate::request::OutboundRequest;

/// Order assigned to transformers that do not override [`RequestTransformer::order`].
pub const DEFAULT_ORDER: i32 = 0;

/// Header carrying the id of the endpoint a request was routed to.
pub const ENDPOINT_ID_HEADER: &str = "x-lodestar-endpoint-id";

/// A pure `(request, endpoint) -> request` function.
pub trait RequestTransformer: Send + Sync {
    /// Returns the request to send to `endpoint`.
    fn transform(&self, request: OutboundRequest, endpoint: &ServiceEndpoint) -> OutboundRequest;

    /// Lower values run first.
    fn order(&self) -> i32 {
        DEFAULT_ORDER
    }
}

/// Ordered, immutable list of transformers.
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn RequestTransformer>>,
}

impl TransformerChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a chain from transformers in registration order.
    pub fn from_transformers(transformers: Vec<Arc<dyn RequestTransformer>>) -> Self {
        let mut transformers = transformers;
        transformers.sort_by_key(|t| t.order());
        Self { transformers }
    }

    /// Returns a new chain with `transformer` registered last among its order.
    pub fn with(mut self, transformer: Arc<dyn RequestTransformer>) -> Self {
        self.transformers.push(transformer);
        Self::from_transformers(self.transformers)
    }

    /// Number of transformers.
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    /// Whether the chain has no transformers.
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Folds `request` through every transformer.
    pub fn apply(&self, request: OutboundRequest, endpoint: &ServiceEndpoint) -> OutboundRequest {
        self.transformers
            .iter()
            .fold(request, |req, t| t.transform(req, endpoint))
    }
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerChain")
            .field("len", &self.transformers.len())
            .finish()
    }
}

/// Forwards the endpoint id and selected endpoint metadata as request headers.
///
/// Metadata key `k` is sent as header `<prefix>k`. Keys or values that are not
/// valid header material are skipped with a warning.
#[derive(Debug, Clone)]
pub struct EndpointHeaderTransformer {
    prefix: String,
    metadata_keys: Vec<String>,
    order: i32,
}

impl EndpointHeaderTransformer {
    /// Forwards only the endpoint id.
    pub fn new() -> Self {
        Self {
            prefix: "x-lodestar-meta-".to_string(),
            metadata_keys: Vec::new(),
            order: DEFAULT_ORDER,
        }
    }

    /// Replaces the metadata header prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Adds a metadata key to forward.
    pub fn forward_metadata(mut self, key: impl Into<String>) -> Self {
        self.metadata_keys.push(key.into());
        self
    }

    /// Overrides the chain order.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl Default for EndpointHeaderTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTransformer for EndpointHeaderTransformer {
    fn transform(&self, request: OutboundRequest, endpoint: &ServiceEndpoint) -> OutboundRequest {
        let mut request = match HeaderValue::from_str(endpoint.endpoint_id()) {
            Ok(value) => request.with_header(ENDPOINT_ID_HEADER, value),
            Err(_) => {
                warn!(endpoint = %endpoint, "endpoint id is not a valid header value");
                request
            }
        };

        for key in &self.metadata_keys {
            let Some(value) = endpoint.metadata().get(key) else {
                continue;
            };
            let name = format!("{}{}", self.prefix, key.to_ascii_lowercase());
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => request = request.with_header(name, value),
                _ => warn!(
                    key = %key,
                    endpoint = %endpoint,
                    "skipping metadata not representable as header"
                ),
            }
        }
        request
    }

    fn order(&self) -> i32 {
        self.order
    }
}
