//! Options chain queries: expirations, strikes and trading classes.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::client::{GatewayClient, GatewayRequest, IbSession};
use crate::types::{ContractSpec, IbPayload, OptionChainParams};

/// Filter for querying a subset of the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainFilter {
    /// Keep only this exchange (e.g. "SMART").
    pub exchange: Option<String>,
    /// Keep only this trading class (e.g. "SPY" rather than "2SPY").
    pub trading_class: Option<String>,
    /// Filter to a specific expiration.
    pub expiry: Option<NaiveDate>,
    /// Minimum strike price.
    pub min_strike: Option<Decimal>,
    /// Maximum strike price.
    pub max_strike: Option<Decimal>,
}

impl ChainFilter {
    /// SMART-routed chain whose trading class is the symbol itself.
    pub fn smart(symbol: &str) -> Self {
        Self {
            exchange: Some("SMART".to_string()),
            trading_class: Some(symbol.to_uppercase()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry = Some(expiry);
        self
    }

    #[must_use]
    pub fn with_strike_range(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_strike = Some(min);
        self.max_strike = Some(max);
        self
    }

    fn matches(&self, params: &OptionChainParams) -> bool {
        let exchange_ok = self
            .exchange
            .as_deref()
            .map_or(true, |exchange| params.exchange.eq_ignore_ascii_case(exchange));
        let class_ok = self
            .trading_class
            .as_deref()
            .map_or(true, |class| params.trading_class.eq_ignore_ascii_case(class));
        exchange_ok && class_ok
    }

    fn strike_in_range(&self, strike: Decimal) -> bool {
        self.min_strike.map_or(true, |min| strike >= min)
            && self.max_strike.map_or(true, |max| strike <= max)
    }

    /// Keeps matching rows, narrowing their expirations and strikes. Rows left
    /// with no expirations or no strikes are dropped.
    pub fn apply(&self, params: Vec<OptionChainParams>) -> Vec<OptionChainParams> {
        params
            .into_iter()
            .filter(|p| self.matches(p))
            .map(|mut p| {
                if let Some(expiry) = self.expiry {
                    p.expirations.retain(|date| *date == expiry);
                }
                p.strikes.retain(|strike| self.strike_in_range(*strike));
                p
            })
            .filter(|p| !p.expirations.is_empty() && !p.strikes.is_empty())
            .collect()
    }
}

impl<C: GatewayClient> IbSession<C> {
    /// Fetch option chain parameters for an underlying.
    ///
    /// Qualifies the underlying first when its `con_id` is unknown.
    pub async fn option_chain_params(
        &self,
        underlying: &ContractSpec,
        filter: &ChainFilter,
    ) -> Result<Vec<OptionChainParams>> {
        let underlying = self.qualify(underlying).await?;
        let con_id = underlying
            .con_id
            .with_context(|| format!("{} has no contract id", underlying.symbol))?;
        debug!(symbol = %underlying.symbol, con_id, "Fetching option chain parameters");

        let timeout = self.config().timeouts.option_params;
        let (req_id, outcome) = self
            .request(timeout, |req_id| GatewayRequest::SecDefOptParams {
                req_id,
                underlying_symbol: underlying.symbol.clone(),
                fut_fop_exchange: String::new(),
                underlying_sec_type: underlying.sec_type,
                underlying_con_id: con_id,
            })
            .await?;

        let params: Vec<OptionChainParams> = outcome
            .into_result(req_id, timeout)
            .with_context(|| format!("Option chain parameters for {}", underlying.symbol))?
            .into_iter()
            .filter_map(IbPayload::into_option_params)
            .collect();

        let received = params.len();
        let kept = filter.apply(params);
        debug!(symbol = %underlying.symbol, received, kept = kept.len(), "Option chain parameters received");
        Ok(kept)
    }

    /// The SMART chain for a US stock.
    pub async fn smart_option_chain(&self, symbol: &str) -> Result<OptionChainParams> {
        self.option_chain_params(&ContractSpec::stock(symbol), &ChainFilter::smart(symbol))
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("No SMART option chain for {}", symbol.to_uppercase()))
    }
}
