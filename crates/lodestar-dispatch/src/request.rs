//! Outbound request values and per-attempt transport options.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, Method, Uri};

use crate::error::{DispatchError, Result};

/// Default connect timeout handed to the transport (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default read timeout handed to the transport (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// An outbound request addressed to a logical service.
///
/// The URI host names the target service until the dispatcher rewrites it for
/// a resolved endpoint. Values are immutable: every `with_*` method consumes
/// the request and returns the modified copy, so a transformer can never
/// observe another transformer's partial edit.
///
/// `http::Uri` drops fragments, so the fragment is kept alongside it and
/// survives URI reconstruction untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    method: Method,
    uri: Uri,
    fragment: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
    charset: Option<String>,
}

impl OutboundRequest {
    /// Parses `uri` (which may carry a `#fragment`) into a new request.
    pub fn new(method: Method, uri: &str) -> Result<Self> {
        let (base, fragment) = match uri.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment.to_string())),
            None => (uri, None),
        };
        let parsed = base.parse::<Uri>().map_err(|e| DispatchError::InvalidUri {
            reason: format!("{}: {}", uri, e),
        })?;
        Ok(Self {
            fragment,
            ..Self::from_uri(method, parsed)
        })
    }

    /// Creates a request from an already parsed URI.
    pub fn from_uri(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            fragment: None,
            headers: HeaderMap::new(),
            body: None,
            charset: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(uri: &str) -> Result<Self> {
        Self::new(Method::GET, uri)
    }

    /// Shorthand for a `POST` request.
    pub fn post(uri: &str) -> Result<Self> {
        Self::new(Method::POST, uri)
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI without fragment.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// URI fragment, if any.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Body charset, if set.
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// The service name carried in the URI host, if present and non-empty.
    pub fn service_name(&self) -> Option<&str> {
        self.uri.host().filter(|host| !host.is_empty())
    }

    /// Replaces the URI, keeping the fragment.
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// Sets a header, replacing every existing value for that name.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header value, keeping existing values for that name.
    pub fn append_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the body charset.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }
}

impl fmt::Display for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)?;
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

/// Per-attempt options passed to the transport.
///
/// Timeouts apply to each attempt independently; they are never summed across
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,
    /// Maximum time to wait for the response.
    pub read_timeout: Duration,
}

impl RequestOptions {
    /// Options with explicit timeouts.
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }
}
