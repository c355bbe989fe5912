//! Gateway callbacks and their mapping onto dispatcher ingress.
//!
//! [`IbCallback`] mirrors the wrapper callbacks an IB gateway client invokes
//! from its reader thread, carrying values in the shapes the gateway sends
//! them (date strings, `f64` prices). [`IbCallback::into_event`] turns each one
//! into a typed [`GatewayEvent`], or `None` when the callback does not concern
//! a pending request.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ibkr_bridge_core::{GatewayEvent, RequestId};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::types::{ContractDetails, ContractSpec, IbPayload, OptionChainParams, PriceBar};

/// Request id the gateway uses for messages not tied to any request.
pub const NO_REQUEST: i32 = -1;

/// Market data farm connection is OK.
pub const CODE_MARKET_DATA_FARM_OK: i32 = 2104;
/// Historical data farm connection is OK.
pub const CODE_HMDS_FARM_OK: i32 = 2106;
/// Sec-def data farm connection is OK.
pub const CODE_SEC_DEF_FARM_OK: i32 = 2158;

const FARM_NAMES: [&str; 4] = ["usfarm", "usfuture", "cafarm", "cashfarm"];

/// A bar as delivered by `historicalData`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    /// `YYYYMMDD`, `YYYYMMDD HH:MM:SS[ tz]`, or epoch seconds.
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IbCallback {
    NextValidId {
        order_id: i32,
    },
    HistoricalData {
        req_id: i32,
        bar: RawBar,
    },
    HistoricalDataEnd {
        req_id: i32,
        start: String,
        end: String,
    },
    ContractDetails {
        req_id: i32,
        details: ContractDetails,
    },
    ContractDetailsEnd {
        req_id: i32,
    },
    SecurityDefinitionOptionParameter {
        req_id: i32,
        exchange: String,
        underlying_con_id: i32,
        trading_class: String,
        multiplier: String,
        expirations: Vec<String>,
        strikes: Vec<f64>,
    },
    SecurityDefinitionOptionParameterEnd {
        req_id: i32,
    },
    Error {
        req_id: i32,
        code: i32,
        message: String,
    },
}

/// Connection-status notices the gateway reports through `error`.
pub fn is_informational(code: i32, message: &str) -> bool {
    match code {
        CODE_MARKET_DATA_FARM_OK => {
            let message = message.to_lowercase();
            FARM_NAMES.iter().any(|farm| message.contains(farm))
        }
        CODE_HMDS_FARM_OK | CODE_SEC_DEF_FARM_OK => true,
        _ => false,
    }
}

impl IbCallback {
    /// Maps the callback onto dispatcher ingress.
    ///
    /// Returns `None` for `nextValidId`, informational status codes, errors not
    /// tied to a request, and rows whose values cannot be parsed.
    pub fn into_event(self) -> Option<GatewayEvent<IbPayload>> {
        match self {
            Self::NextValidId { .. } => None,
            Self::HistoricalData { req_id, bar } => {
                let req_id = RequestId::new(req_id);
                match parse_bar(&bar) {
                    Some(bar) => Some(GatewayEvent::Row {
                        req_id,
                        value: IbPayload::Bar(bar),
                    }),
                    None => {
                        warn!(req_id = %req_id, date = %bar.date, "Dropping unparsable bar");
                        None
                    }
                }
            }
            Self::HistoricalDataEnd { req_id, start, end } => {
                debug!(req_id, %start, %end, "Historical data complete");
                Some(GatewayEvent::End {
                    req_id: RequestId::new(req_id),
                })
            }
            Self::ContractDetails { req_id, details } => Some(GatewayEvent::Item {
                req_id: RequestId::new(req_id),
                value: IbPayload::ContractDetails(details),
            }),
            Self::ContractDetailsEnd { req_id } | Self::SecurityDefinitionOptionParameterEnd { req_id } => {
                Some(GatewayEvent::End {
                    req_id: RequestId::new(req_id),
                })
            }
            Self::SecurityDefinitionOptionParameter {
                req_id,
                exchange,
                underlying_con_id,
                trading_class,
                multiplier,
                expirations,
                strikes,
            } => {
                let params = OptionChainParams {
                    exchange,
                    underlying_con_id,
                    trading_class,
                    multiplier,
                    expirations: parse_expirations(&expirations),
                    strikes: parse_strikes(&strikes),
                };
                Some(GatewayEvent::Item {
                    req_id: RequestId::new(req_id),
                    value: IbPayload::OptionParams(params),
                })
            }
            Self::Error {
                req_id,
                code,
                message,
            } => {
                if is_informational(code, &message) {
                    debug!(code, %message, "Gateway status notice");
                    return None;
                }
                if req_id == NO_REQUEST {
                    warn!(code, %message, "Gateway error not tied to a request");
                    return None;
                }
                warn!(req_id, code, %message, "Gateway rejected request");
                Some(GatewayEvent::Rejected {
                    req_id: RequestId::new(req_id),
                    code,
                    message,
                })
            }
        }
    }
}

/// Builds the `contractDetails` payload for a qualified contract.
pub fn contract_details(
    contract: ContractSpec,
    long_name: &str,
    trading_class: &str,
    min_tick: f64,
) -> ContractDetails {
    ContractDetails {
        contract,
        long_name: long_name.to_string(),
        trading_class: trading_class.to_string(),
        min_tick: Decimal::from_f64(min_tick).unwrap_or_default(),
    }
}

fn parse_bar(raw: &RawBar) -> Option<PriceBar> {
    Some(PriceBar {
        timestamp: parse_bar_time(&raw.date)?,
        open: Decimal::from_f64(raw.open)?,
        high: Decimal::from_f64(raw.high)?,
        low: Decimal::from_f64(raw.low)?,
        close: Decimal::from_f64(raw.close)?,
        volume: if raw.volume.is_finite() && raw.volume > 0.0 {
            raw.volume.round() as u64
        } else {
            0
        },
    })
}

/// Bar times arrive as a date, a date-time (trailing time zone name ignored,
/// read as UTC), or epoch seconds.
fn parse_bar_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return DateTime::from_timestamp(raw.parse().ok()?, 0);
    }
    let mut parts = raw.split_whitespace();
    let stamp = format!("{} {}", parts.next()?, parts.next()?);
    NaiveDateTime::parse_from_str(&stamp, "%Y%m%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_expirations(raw: &[String]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = raw
        .iter()
        .filter_map(|s| match NaiveDate::parse_from_str(s, "%Y%m%d") {
            Ok(date) => Some(date),
            Err(_) => {
                debug!(expiration = %s, "Skipping malformed expiration");
                None
            }
        })
        .collect();
    dates.sort_unstable();
    dates.dedup();
    dates
}

fn parse_strikes(raw: &[f64]) -> Vec<Decimal> {
    let mut strikes: Vec<Decimal> = raw
        .iter()
        .filter_map(|strike| Decimal::from_f64(*strike))
        .map(|strike| strike.normalize())
        .collect();
    strikes.sort_unstable();
    strikes.dedup();
    strikes
}
