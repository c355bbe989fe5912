//! Tagged ingress for gateway callbacks.

use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::request_id::RequestId;

/// A callback notification from the gateway, reduced to what the dispatcher
/// needs: the request it belongs to and an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayEvent<T> {
    /// One data row of a streaming answer (e.g. a historical bar).
    Row { req_id: RequestId, value: T },
    /// One metadata item (e.g. a contract-details match).
    Item { req_id: RequestId, value: T },
    /// The gateway finished answering the request.
    End { req_id: RequestId },
    /// The gateway reported an error for the request.
    Rejected {
        req_id: RequestId,
        code: i32,
        message: String,
    },
}

impl<T> GatewayEvent<T> {
    #[must_use]
    pub fn req_id(&self) -> RequestId {
        match self {
            Self::Row { req_id, .. }
            | Self::Item { req_id, .. }
            | Self::End { req_id }
            | Self::Rejected { req_id, .. } => *req_id,
        }
    }
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// Single ingress for gateway callbacks.
    ///
    /// Rows and items are appended to the results and forwarded to a
    /// registered handler; `End` completes the request; `Rejected` completes it with an
    /// error. Never fails, whatever the request's state.
    pub fn ingest(&self, event: GatewayEvent<T>) {
        match event {
            GatewayEvent::Row { req_id, value } | GatewayEvent::Item { req_id, value } => {
                // Record before the handler runs: a handler may complete the request.
                self.push_result(req_id, value.clone());
                self.dispatch(req_id, &value);
            }
            GatewayEvent::End { req_id } => self.signal_complete(req_id),
            GatewayEvent::Rejected {
                req_id,
                code,
                message,
            } => self.reject(req_id, code, message),
        }
    }
}
