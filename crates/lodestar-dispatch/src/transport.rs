//! Transport abstraction consumed by the dispatchers.
//!
//! The dispatch layer never performs network I/O itself. A `Transport`
//! implementation (HTTP client, in-process fake, ...) executes one request per
//! call and blocks the calling thread until a response or error is available.

use crate::error::TransportError;
use crate::request::{OutboundRequest, RequestOptions};
use crate::response::TransportResponse;

/// Executes a single request attempt.
///
/// Implementations must tolerate repeated calls with different requests and
/// must not carry state between calls that changes the outcome of a later one.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response.
    ///
    /// # Arguments
    /// * `request` - The fully resolved request.
    /// * `options` - Connect and read timeouts for this attempt only.
    fn execute(
        &self,
        request: &OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&OutboundRequest, &RequestOptions) -> Result<TransportResponse, TransportError>
        + Send
        + Sync,
{
    fn execute(
        &self,
        request: &OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        self(request, options)
    }
}
