//! Historical bars for underlyings.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::client::{GatewayClient, GatewayRequest, IbSession};
use crate::types::{ContractSpec, IbPayload, PriceBar};

/// Parameters of a historical data request, in gateway notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalQuery {
    /// Window end as `YYYYMMDD HH:MM:SS`; empty means now.
    pub end_date_time: String,
    /// Lookback, e.g. "30 D" or "1 Y".
    pub duration: String,
    /// Bar size, e.g. "1 day" or "5 mins".
    pub bar_size: String,
    /// "TRADES", "MIDPOINT", ...
    pub what_to_show: String,
    /// Regular trading hours only.
    pub use_rth: bool,
}

impl HistoricalQuery {
    /// Daily trade bars over the last `days` days, regular hours only.
    pub fn daily(days: u32) -> Self {
        Self {
            end_date_time: String::new(),
            duration: format!("{days} D"),
            bar_size: "1 day".to_string(),
            what_to_show: "TRADES".to_string(),
            use_rth: true,
        }
    }

    #[must_use]
    pub fn ending_at(mut self, end_date_time: &str) -> Self {
        self.end_date_time = end_date_time.to_string();
        self
    }

    #[must_use]
    pub fn with_bar_size(mut self, bar_size: &str) -> Self {
        self.bar_size = bar_size.to_string();
        self
    }

    #[must_use]
    pub fn showing(mut self, what_to_show: &str) -> Self {
        self.what_to_show = what_to_show.to_string();
        self
    }
}

impl<C: GatewayClient> IbSession<C> {
    /// Fetch historical bars for a contract.
    ///
    /// Bars stream in as rows until `historicalDataEnd`. On timeout the request
    /// is cancelled at the gateway and an error returned.
    pub async fn historical_bars(
        &self,
        contract: &ContractSpec,
        query: &HistoricalQuery,
    ) -> Result<Vec<PriceBar>> {
        debug!(
            symbol = %contract.symbol,
            duration = %query.duration,
            bar_size = %query.bar_size,
            "Fetching historical bars"
        );

        let timeout = self.config().timeouts.historical_data;
        let (req_id, outcome) = self
            .request(timeout, |req_id| GatewayRequest::HistoricalData {
                req_id,
                contract: contract.clone(),
                query: query.clone(),
            })
            .await?;

        if outcome.is_timed_out() {
            if let Err(err) = self.submit(GatewayRequest::CancelHistoricalData { req_id }) {
                warn!(req_id = %req_id, error = %err, "Failed to cancel timed-out historical request");
            }
        }

        let bars: Vec<PriceBar> = outcome
            .into_result(req_id, timeout)
            .with_context(|| format!("Historical bars for {}", contract.symbol))?
            .into_iter()
            .filter_map(IbPayload::into_bar)
            .collect();

        debug!(symbol = %contract.symbol, bars = bars.len(), "Historical bars received");
        Ok(bars)
    }

    /// Fetch daily bars for a US stock.
    pub async fn daily_bars(&self, symbol: &str, duration_days: u32) -> Result<Vec<PriceBar>> {
        self.historical_bars(&ContractSpec::stock(symbol), &HistoricalQuery::daily(duration_days))
            .await
    }
}
