//! Transport responses and replayable bodies.

use std::fmt;
use std::io::{Cursor, Read};

use bytes::Bytes;
use http::header::IntoHeaderName;
use http::{HeaderMap, HeaderValue, StatusCode};

/// Body of a transport response.
pub enum ResponseBody {
    /// No body.
    Empty,
    /// A one-shot stream owned by the transport (socket, pipe, ...).
    Stream(Box<dyn Read + Send>),
    /// A materialized body that can be read any number of times.
    Buffered(Bytes),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Stream(_) => f.write_str("Stream(<reader>)"),
            ResponseBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
        }
    }
}

/// A response returned by the transport.
#[derive(Debug)]
pub struct TransportResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl TransportResponse {
    /// Creates a response with no headers and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Appends a header value.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attaches an already buffered body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::Buffered(body.into());
        self
    }

    /// Attaches a one-shot body stream.
    pub fn with_stream(mut self, reader: impl Read + Send + 'static) -> Self {
        self.body = ResponseBody::Stream(Box::new(reader));
        self
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Returns true unless the body is an unread stream.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.body, ResponseBody::Stream(_))
    }

    /// Reads a streamed body to the end and drops the stream.
    ///
    /// Dropping the reader releases the transport resource behind it. Calling
    /// this on an already buffered or empty response is a no-op.
    pub fn buffered(self) -> std::io::Result<Self> {
        let body = match self.body {
            ResponseBody::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                drop(reader);
                ResponseBody::Buffered(Bytes::from(buf))
            }
            other => other,
        };
        Ok(Self {
            status: self.status,
            headers: self.headers,
            body,
        })
    }

    /// The buffered body, if the response has been materialized.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// A fresh reader over a buffered body; `None` for unread streams.
    pub fn replay(&self) -> Option<Cursor<Bytes>> {
        match &self.body {
            ResponseBody::Empty => Some(Cursor::new(Bytes::new())),
            ResponseBody::Buffered(bytes) => Some(Cursor::new(bytes.clone())),
            ResponseBody::Stream(_) => None,
        }
    }

    /// Consumes the response and returns its body as bytes.
    pub fn into_bytes(self) -> std::io::Result<Bytes> {
        match self.buffered()?.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            _ => Ok(Bytes::new()),
        }
    }
}
