//! IB Gateway/TWS sessions.
//!
//! A session owns the gateway client and one request dispatcher for the
//! lifetime of the connection. The client's reader thread feeds callbacks in
//! through a [`CallbackIngress`]; request helpers follow the same four steps:
//! allocate an id, register it, submit, wait.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ibkr_bridge_core::{AppConfig, Dispatcher, GatewayConfig, GatewayEvent, RequestId, WaitOutcome};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::callbacks::IbCallback;
use crate::error::GatewayError;
use crate::market_data::HistoricalQuery;
use crate::types::{ContractSpec, IbPayload, SecurityType};

/// An outbound request, tagged with the id its callbacks will carry.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    ContractDetails {
        req_id: RequestId,
        contract: ContractSpec,
    },
    SecDefOptParams {
        req_id: RequestId,
        underlying_symbol: String,
        /// Empty for equity options.
        fut_fop_exchange: String,
        underlying_sec_type: SecurityType,
        underlying_con_id: i32,
    },
    HistoricalData {
        req_id: RequestId,
        contract: ContractSpec,
        query: HistoricalQuery,
    },
    CancelHistoricalData {
        req_id: RequestId,
    },
}

impl GatewayRequest {
    pub fn req_id(&self) -> RequestId {
        match self {
            Self::ContractDetails { req_id, .. }
            | Self::SecDefOptParams { req_id, .. }
            | Self::HistoricalData { req_id, .. }
            | Self::CancelHistoricalData { req_id } => *req_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContractDetails { .. } => "contract_details",
            Self::SecDefOptParams { .. } => "sec_def_opt_params",
            Self::HistoricalData { .. } => "historical_data",
            Self::CancelHistoricalData { .. } => "cancel_historical_data",
        }
    }
}

/// The gateway SDK as seen by a session.
///
/// Implementations perform network I/O on their own thread and report every
/// callback to the ingress handed to [`GatewayClient::start`].
pub trait GatewayClient: Send + Sync {
    /// Connects and begins delivering callbacks to `ingress`.
    fn start(&mut self, config: &GatewayConfig, ingress: CallbackIngress) -> Result<(), GatewayError>;

    /// Hands a request to the gateway. Must not block on the answer.
    fn submit(&self, request: GatewayRequest) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    /// Stops the reader thread and closes the connection.
    fn disconnect(&mut self) {}
}

/// Entry point for callbacks coming off the gateway's reader thread.
///
/// Cheap to clone; never blocks on waiters and never fails.
#[derive(Clone)]
pub struct CallbackIngress {
    dispatcher: Arc<Dispatcher<IbPayload>>,
    next_valid_id: Arc<watch::Sender<Option<i32>>>,
}

impl CallbackIngress {
    pub fn deliver(&self, callback: IbCallback) {
        if let IbCallback::NextValidId { order_id } = callback {
            debug!(order_id, "Gateway announced next valid id");
            self.next_valid_id.send_replace(Some(order_id));
            return;
        }
        if let Some(event) = callback.into_event() {
            if let GatewayEvent::Row { req_id, value } | GatewayEvent::Item { req_id, value } = &event {
                trace!(req_id = %req_id, kind = value.kind(), "Routing gateway payload");
            }
            self.dispatcher.ingest(event);
        }
    }
}

/// A connected gateway session.
pub struct IbSession<C: GatewayClient> {
    config: AppConfig,
    dispatcher: Arc<Dispatcher<IbPayload>>,
    next_valid_id: watch::Receiver<Option<i32>>,
    client: C,
}

impl<C: GatewayClient> IbSession<C> {
    /// Starts `client` and waits for the gateway's `nextValidId` handshake.
    pub async fn connect(config: AppConfig, mut client: C) -> Result<Self> {
        let url = config.gateway.connection_url();
        info!(url = %url, client_id = config.gateway.client_id, "Connecting to IB Gateway");

        let dispatcher = Arc::new(
            Dispatcher::new(&config.dispatcher).context("Invalid dispatcher configuration")?,
        );
        let (tx, mut rx) = watch::channel(None);
        let ingress = CallbackIngress {
            dispatcher: Arc::clone(&dispatcher),
            next_valid_id: Arc::new(tx),
        };

        client
            .start(&config.gateway, ingress)
            .context("Failed to connect to IB Gateway")?;

        let timeout = config.gateway.connect_timeout;
        let handshake = tokio::time::timeout(timeout, rx.wait_for(Option::is_some))
            .await
            .map(|received| received.map(|id| *id));
        let order_id = match handshake {
            Ok(Ok(Some(order_id))) => order_id,
            _ => {
                client.disconnect();
                return Err(GatewayError::HandshakeTimeout {
                    timeout_secs: timeout.as_secs(),
                })
                .context("IB Gateway did not complete the handshake");
            }
        };

        info!(order_id, "Connected to IB Gateway");
        Ok(Self {
            config,
            dispatcher,
            next_valid_id: rx,
            client,
        })
    }

    /// Request bookkeeping for this connection, for call sites that drive the
    /// allocate/register/submit/wait steps themselves.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<IbPayload>> {
        &self.dispatcher
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Get a reference to the underlying gateway client.
    pub fn inner(&self) -> &C {
        &self.client
    }

    /// Check if the connection is alive.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Latest order id announced by the gateway.
    pub fn next_order_id(&self) -> Option<i32> {
        *self.next_valid_id.borrow()
    }

    /// Hands `request` to the gateway without registering anything.
    pub fn submit(&self, request: GatewayRequest) -> Result<(), GatewayError> {
        if !self.client.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        info!(req_id = %request.req_id(), kind = request.kind(), "Submitting gateway request");
        self.client.submit(request)
    }

    /// Allocates and registers an id, then submits the request `build` makes
    /// for it. The id is cleared again if submission fails.
    fn begin<F>(&self, build: F) -> Result<RequestId, GatewayError>
    where
        F: FnOnce(RequestId) -> GatewayRequest,
    {
        let req_id = self.dispatcher.next_id()?;
        self.dispatcher.register(req_id);
        if let Err(err) = self.submit(build(req_id)) {
            self.dispatcher.clear(req_id);
            return Err(err);
        }
        Ok(req_id)
    }

    /// Full round trip for async call sites; the id is always cleared.
    pub async fn request<F>(
        &self,
        timeout: Duration,
        build: F,
    ) -> Result<(RequestId, WaitOutcome<IbPayload>), GatewayError>
    where
        F: FnOnce(RequestId) -> GatewayRequest,
    {
        let req_id = self.begin(build)?;
        let outcome = self.dispatcher.collect_async(req_id, timeout).await;
        Ok((req_id, outcome))
    }

    /// Full round trip for blocking call sites. Blocks the calling thread, so
    /// keep it off async executors.
    pub fn request_blocking<F>(
        &self,
        timeout: Duration,
        build: F,
    ) -> Result<(RequestId, WaitOutcome<IbPayload>), GatewayError>
    where
        F: FnOnce(RequestId) -> GatewayRequest,
    {
        let req_id = self.begin(build)?;
        let outcome = self.dispatcher.collect(req_id, timeout);
        Ok((req_id, outcome))
    }

    /// Disconnects the client. Requests still pending stay registered until
    /// their callers time out and clear them.
    pub fn disconnect(&mut self) {
        let pending = self.dispatcher.pending_count();
        if pending > 0 {
            warn!(pending, "Disconnecting with requests still pending");
        }
        self.client.disconnect();
        info!("Disconnected from IB Gateway");
    }
}
