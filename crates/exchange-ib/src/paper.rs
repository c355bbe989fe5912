//! Simulated gateway.
//!
//! Answers requests from a [`GatewayScript`] on its own reader thread, through
//! the same [`CallbackIngress`] a real gateway client feeds. Useful for paper
//! runs and for exercising the full session pipeline without IB Gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ibkr_bridge_core::GatewayConfig;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::callbacks::{IbCallback, RawBar, CODE_MARKET_DATA_FARM_OK, NO_REQUEST};
use crate::client::{CallbackIngress, GatewayClient, GatewayRequest};
use crate::error::GatewayError;
use crate::types::{ContractDetails, ContractSpec, OptionChainParams, PriceBar};

/// Gateway code for an unknown contract.
pub const CODE_NO_SECURITY_DEFINITION: i32 = 200;
/// Gateway code for historical data failures.
pub const CODE_HMDS_ERROR: i32 = 162;

/// Canned gateway answers.
#[derive(Debug, Clone)]
pub struct GatewayScript {
    contracts: Vec<ContractDetails>,
    option_params: Vec<OptionChainParams>,
    bars: HashMap<String, Vec<PriceBar>>,
    rejections: HashMap<String, (i32, String)>,
    latency: Duration,
    withhold_end: bool,
    first_order_id: i32,
}

impl Default for GatewayScript {
    fn default() -> Self {
        Self {
            contracts: Vec::new(),
            option_params: Vec::new(),
            bars: HashMap::new(),
            rejections: HashMap::new(),
            latency: Duration::ZERO,
            withhold_end: false,
            first_order_id: 1,
        }
    }
}

impl GatewayScript {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_contract(mut self, details: ContractDetails) -> Self {
        self.contracts.push(details);
        self
    }

    #[must_use]
    pub fn with_option_params(mut self, params: OptionChainParams) -> Self {
        self.option_params.push(params);
        self
    }

    #[must_use]
    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.insert(symbol.to_uppercase(), bars);
        self
    }

    /// Every request naming `symbol` is answered with this gateway error.
    #[must_use]
    pub fn with_rejection(mut self, symbol: &str, code: i32, message: &str) -> Self {
        self.rejections
            .insert(symbol.to_uppercase(), (code, message.to_string()));
        self
    }

    /// Delay before each answer.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Deliver rows but never the terminating callback.
    #[must_use]
    pub fn withholding_end(mut self) -> Self {
        self.withhold_end = true;
        self
    }

    #[must_use]
    pub fn with_first_order_id(mut self, order_id: i32) -> Self {
        self.first_order_id = order_id;
        self
    }

    fn rejection(&self, req_id: i32, symbol: &str) -> Option<IbCallback> {
        self.rejections
            .get(&symbol.to_uppercase())
            .map(|(code, message)| IbCallback::Error {
                req_id,
                code: *code,
                message: message.clone(),
            })
    }

    fn finish(&self, mut callbacks: Vec<IbCallback>, end: IbCallback) -> Vec<IbCallback> {
        if !self.withhold_end {
            callbacks.push(end);
        }
        callbacks
    }

    /// The callbacks the gateway would send for `request`, in order.
    pub fn answer(&self, request: &GatewayRequest) -> Vec<IbCallback> {
        match request {
            GatewayRequest::ContractDetails { req_id, contract } => {
                let req_id = req_id.get();
                if let Some(error) = self.rejection(req_id, &contract.symbol) {
                    return vec![error];
                }
                let matches: Vec<IbCallback> = self
                    .contracts
                    .iter()
                    .filter(|details| same_instrument(&details.contract, contract))
                    .map(|details| IbCallback::ContractDetails {
                        req_id,
                        details: details.clone(),
                    })
                    .collect();
                if matches.is_empty() {
                    return vec![IbCallback::Error {
                        req_id,
                        code: CODE_NO_SECURITY_DEFINITION,
                        message: "No security definition has been found for the request"
                            .to_string(),
                    }];
                }
                self.finish(matches, IbCallback::ContractDetailsEnd { req_id })
            }
            GatewayRequest::SecDefOptParams {
                req_id,
                underlying_symbol,
                underlying_con_id,
                ..
            } => {
                let req_id = req_id.get();
                if let Some(error) = self.rejection(req_id, underlying_symbol) {
                    return vec![error];
                }
                let items = self
                    .option_params
                    .iter()
                    .filter(|params| params.underlying_con_id == *underlying_con_id)
                    .map(|params| IbCallback::SecurityDefinitionOptionParameter {
                        req_id,
                        exchange: params.exchange.clone(),
                        underlying_con_id: params.underlying_con_id,
                        trading_class: params.trading_class.clone(),
                        multiplier: params.multiplier.clone(),
                        expirations: params
                            .expirations
                            .iter()
                            .map(|date| date.format("%Y%m%d").to_string())
                            .collect(),
                        strikes: params.strikes.iter().map(|s| to_f64(*s)).collect(),
                    })
                    .collect();
                self.finish(items, IbCallback::SecurityDefinitionOptionParameterEnd { req_id })
            }
            GatewayRequest::HistoricalData {
                req_id, contract, ..
            } => {
                let req_id = req_id.get();
                if let Some(error) = self.rejection(req_id, &contract.symbol) {
                    return vec![error];
                }
                let Some(bars) = self.bars.get(&contract.symbol.to_uppercase()) else {
                    return vec![IbCallback::Error {
                        req_id,
                        code: CODE_HMDS_ERROR,
                        message: "Historical Market Data Service error message:HMDS query returned no data"
                            .to_string(),
                    }];
                };
                let rows = bars
                    .iter()
                    .map(|bar| IbCallback::HistoricalData {
                        req_id,
                        bar: RawBar {
                            date: bar.timestamp.format("%Y%m%d %H:%M:%S").to_string(),
                            open: to_f64(bar.open),
                            high: to_f64(bar.high),
                            low: to_f64(bar.low),
                            close: to_f64(bar.close),
                            volume: bar.volume as f64,
                        },
                    })
                    .collect();
                let stamp = |bar: Option<&PriceBar>| {
                    bar.map(|b| b.timestamp.format("%Y%m%d %H:%M:%S").to_string())
                        .unwrap_or_default()
                };
                self.finish(
                    rows,
                    IbCallback::HistoricalDataEnd {
                        req_id,
                        start: stamp(bars.first()),
                        end: stamp(bars.last()),
                    },
                )
            }
            GatewayRequest::CancelHistoricalData { .. } => Vec::new(),
        }
    }
}

fn same_instrument(known: &ContractSpec, requested: &ContractSpec) -> bool {
    known.symbol.eq_ignore_ascii_case(&requested.symbol)
        && known.sec_type == requested.sec_type
        && requested.con_id.map_or(true, |id| known.con_id == Some(id))
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// [`GatewayClient`] backed by a [`GatewayScript`].
pub struct SimulatedGateway {
    script: Arc<GatewayScript>,
    outbox: Mutex<Option<mpsc::Sender<GatewayRequest>>>,
    worker: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    submitted: Arc<Mutex<Vec<GatewayRequest>>>,
}

impl SimulatedGateway {
    pub fn new(script: GatewayScript) -> Self {
        Self {
            script: Arc::new(script),
            outbox: Mutex::new(None),
            worker: None,
            connected: Arc::new(AtomicBool::new(false)),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request submitted so far, in order.
    pub fn submitted(&self) -> Vec<GatewayRequest> {
        self.submitted.lock().clone()
    }
}

impl GatewayClient for SimulatedGateway {
    fn start(&mut self, config: &GatewayConfig, ingress: CallbackIngress) -> Result<(), GatewayError> {
        if self.worker.is_some() {
            return Err(GatewayError::Connect("simulated gateway already started".to_string()));
        }

        let (tx, rx) = mpsc::channel::<GatewayRequest>();
        let script = Arc::clone(&self.script);
        let worker = thread::Builder::new()
            .name("sim-gateway-reader".to_string())
            .spawn(move || {
                ingress.deliver(IbCallback::Error {
                    req_id: NO_REQUEST,
                    code: CODE_MARKET_DATA_FARM_OK,
                    message: "Market data farm connection is OK:usfarm".to_string(),
                });
                ingress.deliver(IbCallback::NextValidId {
                    order_id: script.first_order_id,
                });
                for request in rx {
                    if !script.latency.is_zero() {
                        thread::sleep(script.latency);
                    }
                    for callback in script.answer(&request) {
                        ingress.deliver(callback);
                    }
                }
                debug!("Simulated gateway reader stopped");
            })
            .map_err(|e| GatewayError::Connect(e.to_string()))?;

        *self.outbox.lock() = Some(tx);
        self.worker = Some(worker);
        self.connected.store(true, Ordering::Release);
        info!(url = %config.connection_url(), "Simulated gateway started");
        Ok(())
    }

    fn submit(&self, request: GatewayRequest) -> Result<(), GatewayError> {
        let outbox = self.outbox.lock();
        let Some(tx) = outbox.as_ref() else {
            return Err(GatewayError::NotConnected);
        };
        self.submitted.lock().push(request.clone());
        let kind = request.kind();
        tx.send(request)
            .map_err(|_| GatewayError::submit(kind, "simulated gateway reader stopped"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.outbox.lock().take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Simulated gateway reader thread panicked");
            }
        }
    }
}

impl Drop for SimulatedGateway {
    fn drop(&mut self) {
        self.disconnect();
    }
}
