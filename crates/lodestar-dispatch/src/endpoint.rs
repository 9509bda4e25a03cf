//! Resolved service endpoints.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A physical address resolved for a logical service name.
///
/// Endpoints are immutable once produced by an
/// [`InstanceResolver`](crate::resolver::InstanceResolver); builder-style
/// methods consume `self` and return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    endpoint_id: String,
    service_name: String,
    host: String,
    port: u16,
    secure: bool,
    metadata: BTreeMap<String, String>,
}

impl ServiceEndpoint {
    /// Creates a plain-text endpoint with no metadata.
    pub fn new(
        endpoint_id: impl Into<String>,
        service_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            service_name: service_name.into(),
            host: host.into(),
            port,
            secure: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Marks the endpoint as requiring a secure scheme.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Unique identifier of this endpoint within its service.
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Logical service this endpoint belongs to.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint must be reached over a secure scheme.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Opaque metadata published with the endpoint (zone, version, ...).
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// `host:port` form, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.endpoint_id, self.authority())
    }
}
