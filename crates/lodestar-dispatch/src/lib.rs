#![warn(missing_docs)]

//! Lodestar dispatch subsystem: service-name resolution, request transformation,
//! retrying dispatch and lifecycle notification for client-side load balancing.
//!
//! A request addressed as `http://<service-name>/path` is routed to a concrete
//! [`ServiceEndpoint`] chosen by an [`InstanceResolver`], rewritten by a
//! [`TransformerChain`], sent through a [`Transport`], and reported to
//! [`LifecycleListener`]s. [`DispatchClient`] wires the pieces together from a
//! [`DispatchConfig`].

pub mod client;
pub mod config;
pub mod direct;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod request;
pub mod resolver;
pub mod response;
pub mod retry;
pub mod retrying;
pub mod transformer;
pub mod transport;
pub mod uri;

pub use client::{DispatchClient, DispatchClientBuilder};
pub use config::{DispatchConfig, HintConfig, ResolutionMissPolicy, ServiceConfig};
pub use direct::DirectDispatcher;
pub use dispatch::{Dispatch, DispatchCore};
pub use endpoint::ServiceEndpoint;
pub use error::{DispatchError, ListenerError, Result, TransportError, TransportErrorKind};
pub use lifecycle::{
    CompletionOutcome, CompletionRecord, CompletionStatus, LifecycleListener, ListenerRegistry,
    ListenerSource, TracingListener,
};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use request::{OutboundRequest, RequestOptions};
pub use resolver::{InstanceResolver, RequestContext, StaticResolver};
pub use response::{ResponseBody, TransportResponse};
pub use retry::{
    default_retryable_errors, BackoffPolicy, ConfiguredRetryPolicy, RetryConfig, RetryPolicy,
    Sleeper, ThreadSleeper,
};
pub use retrying::RetryingDispatcher;
pub use transformer::{EndpointHeaderTransformer, RequestTransformer, TransformerChain};
pub use transport::Transport;
pub use uri::{EndpointUriReconstructor, UriReconstructor};
