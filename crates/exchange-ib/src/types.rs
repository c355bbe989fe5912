//! Core types for IB reference and market data requests.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Security type as the gateway spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "OPT")]
    Option,
    #[serde(rename = "FUT")]
    Future,
    #[serde(rename = "IND")]
    Index,
}

impl std::fmt::Display for SecurityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stock => write!(f, "STK"),
            Self::Option => write!(f, "OPT"),
            Self::Future => write!(f, "FUT"),
            Self::Index => write!(f, "IND"),
        }
    }
}

/// A contract as sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: String,
    pub sec_type: SecurityType,
    /// Exchange routing (e.g., "SMART", "CBOE").
    pub exchange: String,
    pub currency: String,
    /// Gateway contract id, once known.
    pub con_id: Option<i32>,
}

impl ContractSpec {
    /// US stock routed through SMART.
    pub fn stock(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            sec_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            con_id: None,
        }
    }

    /// US index (e.g. VIX on CBOE).
    pub fn index(symbol: &str, exchange: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            sec_type: SecurityType::Index,
            exchange: exchange.to_uppercase(),
            currency: "USD".to_string(),
            con_id: None,
        }
    }

    #[must_use]
    pub fn with_con_id(mut self, con_id: i32) -> Self {
        self.con_id = Some(con_id);
        self
    }
}

/// One contract-details match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDetails {
    /// Fully qualified contract, `con_id` populated.
    pub contract: ContractSpec,
    pub long_name: String,
    pub trading_class: String,
    pub min_tick: Decimal,
}

impl ContractDetails {
    /// Contract id of the match; qualified contracts always carry one.
    pub fn con_id(&self) -> Option<i32> {
        self.contract.con_id
    }
}

/// Option chain parameters for one exchange/trading class of an underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainParams {
    pub exchange: String,
    pub underlying_con_id: i32,
    pub trading_class: String,
    pub multiplier: String,
    /// Sorted ascending.
    pub expirations: Vec<NaiveDate>,
    /// Sorted ascending.
    pub strikes: Vec<Decimal>,
}

/// A historical price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Everything a gateway callback can deliver for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IbPayload {
    Bar(PriceBar),
    ContractDetails(ContractDetails),
    OptionParams(OptionChainParams),
}

impl IbPayload {
    pub fn into_bar(self) -> Option<PriceBar> {
        match self {
            Self::Bar(bar) => Some(bar),
            _ => None,
        }
    }

    pub fn into_contract_details(self) -> Option<ContractDetails> {
        match self {
            Self::ContractDetails(details) => Some(details),
            _ => None,
        }
    }

    pub fn into_option_params(self) -> Option<OptionChainParams> {
        match self {
            Self::OptionParams(params) => Some(params),
            _ => None,
        }
    }

    /// Short tag for the `kind` field of routing logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bar(_) => "bar",
            Self::ContractDetails(_) => "contract_details",
            Self::OptionParams(_) => "option_params",
        }
    }
}
