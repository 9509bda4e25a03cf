//! Single-attempt dispatch.
//!
//! Resolves one endpoint, sends one request and reports the outcome. The
//! response body is handed back untouched, still streaming if the transport
//! streamed it.

use std::time::Instant;

use tracing::debug;

use crate::dispatch::{Dispatch, DispatchCore};
use crate::error::{DispatchError, Result};
use crate::lifecycle::CompletionRecord;
use crate::request::{OutboundRequest, RequestOptions};
use crate::response::TransportResponse;

/// Dispatcher used when retries are disabled.
#[derive(Debug, Clone)]
pub struct DirectDispatcher {
    core: DispatchCore,
}

impl DirectDispatcher {
    /// Creates a dispatcher over `core`.
    pub fn new(core: DispatchCore) -> Self {
        Self { core }
    }
}

impl Dispatch for DirectDispatcher {
    fn execute(
        &self,
        request: OutboundRequest,
        options: &RequestOptions,
    ) -> Result<TransportResponse> {
        let (service, context, notifier) = self.core.begin(&request)?;
        let started = Instant::now();

        let Some(endpoint) = self.core.resolver().choose(&service, &context) else {
            return self.core.resolution_miss(notifier, context, &request, options);
        };

        let outbound = match self.core.prepare(&request, &endpoint) {
            Ok(outbound) => outbound,
            Err(e) => {
                notifier.complete(CompletionRecord::failed(
                    context,
                    Some(endpoint),
                    &e,
                    0,
                    started.elapsed(),
                ));
                return Err(e);
            }
        };

        notifier.start_request(&context, Some(&endpoint));
        debug!(service = %service, endpoint = %endpoint, uri = %outbound.uri(), "sending request");

        match self.core.transport().execute(&outbound, options) {
            Ok(response) => {
                notifier.complete(CompletionRecord::success(
                    context,
                    Some(endpoint),
                    &response,
                    1,
                    started.elapsed(),
                ));
                Ok(response)
            }
            Err(e) => {
                let error = DispatchError::from(e);
                notifier.complete(CompletionRecord::failed(
                    context,
                    Some(endpoint),
                    &error,
                    1,
                    started.elapsed(),
                ));
                Err(error)
            }
        }
    }
}
