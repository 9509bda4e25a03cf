//! Rewriting service-name URIs into endpoint URIs.

use http::uri::{Scheme, Uri};

use crate::endpoint::ServiceEndpoint;
use crate::error::{DispatchError, Result};

/// Rebuilds a request URI so that it targets a resolved endpoint.
pub trait UriReconstructor: Send + Sync {
    /// Replaces scheme, host and port of `original` while preserving its path
    /// and query.
    fn reconstruct(&self, endpoint: &ServiceEndpoint, original: &Uri) -> Result<Uri>;
}

/// Default reconstructor.
///
/// Scheme rules: `http` becomes `https` and `ws` becomes `wss` when the
/// endpoint is secure; a missing scheme becomes `http` or `https` from the
/// endpoint's secure flag; any other scheme is kept. A port of `0` means
/// "unset" and is omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointUriReconstructor;

impl EndpointUriReconstructor {
    fn scheme_for(endpoint: &ServiceEndpoint, original: &Uri) -> String {
        let secure = endpoint.is_secure();
        match original.scheme_str() {
            None if secure => Scheme::HTTPS.to_string(),
            None => Scheme::HTTP.to_string(),
            Some("http") if secure => Scheme::HTTPS.to_string(),
            Some("ws") if secure => "wss".to_string(),
            Some(other) => other.to_string(),
        }
    }

    fn authority_for(endpoint: &ServiceEndpoint, original: &Uri) -> String {
        let host_port = if endpoint.port() == 0 {
            if endpoint.host().contains(':') && !endpoint.host().starts_with('[') {
                format!("[{}]", endpoint.host())
            } else {
                endpoint.host().to_string()
            }
        } else {
            endpoint.authority()
        };
        match original.authority().map(|a| a.as_str()) {
            Some(authority) => match authority.rsplit_once('@') {
                Some((userinfo, _)) => format!("{}@{}", userinfo, host_port),
                None => host_port,
            },
            None => host_port,
        }
    }
}

impl UriReconstructor for EndpointUriReconstructor {
    fn reconstruct(&self, endpoint: &ServiceEndpoint, original: &Uri) -> Result<Uri> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Uri::builder()
            .scheme(Self::scheme_for(endpoint, original).as_str())
            .authority(Self::authority_for(endpoint, original).as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| DispatchError::InvalidUri {
                reason: format!("cannot rebuild {} for {}: {}", original, endpoint, e),
            })
    }
}
