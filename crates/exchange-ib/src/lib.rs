//! Interactive Brokers gateway integration.
//!
//! Wraps a callback-driven IB gateway client in an [`IbSession`] that owns one
//! request dispatcher per connection, maps gateway callbacks onto dispatcher
//! ingress, and offers request helpers for contract details, option-chain
//! parameters and historical bars. [`SimulatedGateway`] stands in for IB
//! Gateway in paper runs and tests.

pub mod callbacks;
pub mod client;
pub mod contracts;
pub mod error;
pub mod market_data;
pub mod options_chain;
pub mod paper;
pub mod types;

pub use callbacks::{IbCallback, RawBar};
pub use client::{CallbackIngress, GatewayClient, GatewayRequest, IbSession};
pub use error::GatewayError;
pub use market_data::HistoricalQuery;
pub use options_chain::ChainFilter;
pub use paper::{GatewayScript, SimulatedGateway};
pub use types::{
    ContractDetails, ContractSpec, IbPayload, OptionChainParams, PriceBar, SecurityType,
};
