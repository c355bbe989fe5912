//! Contract details lookups.

use anyhow::{Context, Result};
use tracing::debug;

use crate::client::{GatewayClient, GatewayRequest, IbSession};
use crate::types::{ContractDetails, ContractSpec, IbPayload};

impl<C: GatewayClient> IbSession<C> {
    /// Fetch every contract-details match for `contract`.
    ///
    /// Completes on `contractDetailsEnd`; a gateway error or timeout is an error.
    pub async fn contract_details(&self, contract: &ContractSpec) -> Result<Vec<ContractDetails>> {
        debug!(symbol = %contract.symbol, sec_type = %contract.sec_type, "Fetching contract details");

        let timeout = self.config().timeouts.contract_details;
        let (req_id, outcome) = self
            .request(timeout, |req_id| GatewayRequest::ContractDetails {
                req_id,
                contract: contract.clone(),
            })
            .await?;

        let details: Vec<ContractDetails> = outcome
            .into_result(req_id, timeout)
            .with_context(|| format!("Contract details for {}", contract.symbol))?
            .into_iter()
            .filter_map(IbPayload::into_contract_details)
            .collect();

        debug!(symbol = %contract.symbol, matches = details.len(), "Contract details received");
        Ok(details)
    }

    /// Resolve `contract` to its first match, `con_id` populated.
    pub async fn qualify(&self, contract: &ContractSpec) -> Result<ContractSpec> {
        if contract.con_id.is_some() {
            return Ok(contract.clone());
        }
        self.contract_details(contract)
            .await?
            .into_iter()
            .map(|details| details.contract)
            .find(|qualified| qualified.con_id.is_some())
            .with_context(|| format!("No contract found for {}", contract.symbol))
    }
}
