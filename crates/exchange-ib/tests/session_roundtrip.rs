//! End-to-end session tests against the simulated gateway.
//!
//! These tests verify the full request path:
//! - handshake on connect
//! - contract details, option chain parameters and historical bars
//! - gateway rejections and timeouts surfacing as typed errors
//! - request bookkeeping never leaking after a helper returns

use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use ibkr_bridge_core::{AppConfig, GatewayConfig, IdError, WaitError, WaitOutcome};
use ibkr_bridge_ib::callbacks::contract_details;
use ibkr_bridge_ib::{
    CallbackIngress, ChainFilter, ContractSpec, GatewayClient, GatewayError, GatewayRequest,
    GatewayScript, IbPayload, IbSession, OptionChainParams, PriceBar, SimulatedGateway,
};
use rust_decimal_macros::dec;

// =============================================================================
// Helper Functions
// =============================================================================

const SPY_CON_ID: i32 = 756733;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.gateway.connect_timeout = Duration::from_secs(2);
    config.timeouts.contract_details = Duration::from_millis(500);
    config.timeouts.option_params = Duration::from_millis(500);
    config.timeouts.historical_data = Duration::from_millis(500);
    config
}

fn chain(exchange: &str, trading_class: &str) -> OptionChainParams {
    OptionChainParams {
        exchange: exchange.to_string(),
        underlying_con_id: SPY_CON_ID,
        trading_class: trading_class.to_string(),
        multiplier: "100".to_string(),
        expirations: vec![
            NaiveDate::from_ymd_opt(2024, 1, 19).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 16).unwrap(),
        ],
        strikes: vec![dec!(460), dec!(470.5), dec!(480)],
    }
}

fn bar(day: u32, close: rust_decimal::Decimal) -> PriceBar {
    PriceBar {
        timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        open: close - dec!(1),
        high: close + dec!(2),
        low: close - dec!(2),
        close,
        volume: 1_000 * u64::from(day),
    }
}

fn spy_script() -> GatewayScript {
    GatewayScript::new()
        .with_first_order_id(42)
        .with_contract(contract_details(
            ContractSpec::stock("SPY").with_con_id(SPY_CON_ID),
            "SPDR S&P 500 ETF TRUST",
            "SPY",
            0.01,
        ))
        .with_option_params(chain("CBOE", "SPY"))
        .with_option_params(chain("SMART", "2SPY"))
        .with_option_params(chain("SMART", "SPY"))
        .with_bars("SPY", vec![bar(3, dec!(470.25)), bar(4, dec!(468.5)), bar(5, dec!(471))])
}

async fn connect(script: GatewayScript) -> IbSession<SimulatedGateway> {
    init_tracing();
    IbSession::connect(fast_config(), SimulatedGateway::new(script))
        .await
        .expect("simulated gateway connects")
}

/// Gateway that accepts the connection but never completes the handshake.
struct MuteGateway;

impl GatewayClient for MuteGateway {
    fn start(&mut self, _config: &GatewayConfig, _ingress: CallbackIngress) -> Result<(), GatewayError> {
        Ok(())
    }

    fn submit(&self, _request: GatewayRequest) -> Result<(), GatewayError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

// =============================================================================
// Connection
// =============================================================================

#[tokio::test]
async fn test_connect_records_next_order_id() {
    let session = connect(spy_script()).await;
    assert!(session.is_connected());
    assert_eq!(session.next_order_id(), Some(42));
}

#[tokio::test]
async fn test_missing_handshake_times_out() {
    init_tracing();
    let mut config = fast_config();
    config.gateway.connect_timeout = Duration::from_millis(100);

    let err = IbSession::connect(config, MuteGateway).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<GatewayError>(),
        Some(GatewayError::HandshakeTimeout { .. })
    ));
}

#[tokio::test]
async fn test_seed_colliding_with_no_request_id_is_refused() {
    init_tracing();
    let mut config = fast_config();
    config.dispatcher.id_seed = -2;

    let err = IbSession::connect(config, SimulatedGateway::new(spy_script()))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<IdError>(),
        Some(IdError::InvalidSeed { seed: -2, .. })
    ));
}

#[tokio::test]
async fn test_submit_after_disconnect_fails() {
    let mut session = connect(spy_script()).await;
    session.disconnect();
    assert!(!session.is_connected());

    let err = session.daily_bars("SPY", 3).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GatewayError>(),
        Some(GatewayError::NotConnected)
    ));
    assert_eq!(session.dispatcher().pending_count(), 0);
}

// =============================================================================
// Requests
// =============================================================================

#[tokio::test]
async fn test_contract_details_round_trip() {
    let session = connect(spy_script()).await;
    let details = session
        .contract_details(&ContractSpec::stock("SPY"))
        .await
        .unwrap();

    assert_eq!(details.len(), 1);
    assert_eq!(details[0].con_id(), Some(SPY_CON_ID));
    assert_eq!(details[0].min_tick, dec!(0.01));
    assert_eq!(session.dispatcher().pending_count(), 0);
}

#[tokio::test]
async fn test_smart_option_chain_qualifies_then_filters() {
    let session = connect(spy_script()).await;
    let params = session.smart_option_chain("spy").await.unwrap();

    assert_eq!(params.exchange, "SMART");
    assert_eq!(params.trading_class, "SPY");
    assert_eq!(params.strikes, vec![dec!(460), dec!(470.5), dec!(480)]);
    assert_eq!(params.expirations.len(), 2);

    let kinds: Vec<&str> = session
        .inner()
        .submitted()
        .iter()
        .map(GatewayRequest::kind)
        .collect();
    assert_eq!(kinds, vec!["contract_details", "sec_def_opt_params"]);
}

#[tokio::test]
async fn test_option_chain_with_strike_range() {
    let session = connect(spy_script()).await;
    let underlying = ContractSpec::stock("SPY").with_con_id(SPY_CON_ID);
    let filter = ChainFilter::default().with_strike_range(dec!(465), dec!(475));

    let params = session.option_chain_params(&underlying, &filter).await.unwrap();
    assert_eq!(params.len(), 3);
    assert!(params.iter().all(|p| p.strikes == vec![dec!(470.5)]));

    // A known con_id skips qualification.
    assert_eq!(session.inner().submitted().len(), 1);
}

#[tokio::test]
async fn test_daily_bars_arrive_in_order() {
    let session = connect(spy_script()).await;
    let bars = session.daily_bars("SPY", 3).await.unwrap();

    let closes: Vec<_> = bars.iter().map(|b| b.close).collect();
    assert_eq!(closes, vec![dec!(470.25), dec!(468.5), dec!(471)]);
    assert_eq!(bars[2].volume, 5_000);
    assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn test_concurrent_requests_do_not_cross() {
    let session = connect(spy_script().with_latency(Duration::from_millis(20))).await;
    let spy = ContractSpec::stock("SPY");

    let (details, bars) = tokio::join!(session.contract_details(&spy), session.daily_bars("SPY", 3));
    assert_eq!(details.unwrap().len(), 1);
    assert_eq!(bars.unwrap().len(), 3);
    assert_eq!(session.dispatcher().pending_count(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_unknown_contract_is_rejected() {
    let session = connect(spy_script()).await;
    let err = session
        .contract_details(&ContractSpec::stock("ZZZZ"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<WaitError>(),
        Some(WaitError::Rejected { code: 200, .. })
    ));
    assert_eq!(session.dispatcher().pending_count(), 0);
}

#[tokio::test]
async fn test_scripted_rejection_for_bars() {
    let script = spy_script().with_rejection("SPY", 162, "HMDS query returned no data");
    let session = connect(script).await;

    let err = session.daily_bars("SPY", 3).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WaitError>(),
        Some(WaitError::Rejected { code: 162, .. })
    ));
}

#[tokio::test]
async fn test_withheld_end_times_out_and_cancels() {
    let session = connect(spy_script().withholding_end()).await;

    let err = session.daily_bars("SPY", 3).await.unwrap_err();
    match err.downcast_ref::<WaitError>() {
        Some(WaitError::TimedOut { partial, .. }) => assert_eq!(*partial, 3),
        other => panic!("expected timeout, got {other:?}"),
    }

    let submitted = session.inner().submitted();
    assert!(matches!(
        submitted.last(),
        Some(GatewayRequest::CancelHistoricalData { .. })
    ));
    assert_eq!(session.dispatcher().pending_count(), 0);
}

#[tokio::test]
async fn test_answers_for_unregistered_ids_are_dropped() {
    let session = connect(spy_script()).await;
    let stray = session.dispatcher().next_id().unwrap();
    session
        .submit(GatewayRequest::ContractDetails {
            req_id: stray,
            contract: ContractSpec::stock("SPY"),
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!session.dispatcher().is_registered(stray));
    assert_eq!(session.dispatcher().pending_count(), 0);
}

// =============================================================================
// Blocking Call Sites
// =============================================================================

#[test]
fn test_request_blocking_from_plain_thread() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let session = runtime.block_on(connect(spy_script()));

    let (req_id, outcome) = session
        .request_blocking(Duration::from_secs(1), |req_id| GatewayRequest::ContractDetails {
            req_id,
            contract: ContractSpec::stock("SPY"),
        })
        .unwrap();

    assert!(req_id.get() > AppConfig::default().dispatcher.id_seed);
    let WaitOutcome::Delivered(values) = outcome else {
        panic!("expected delivery");
    };
    assert!(matches!(values.as_slice(), [IbPayload::ContractDetails(_)]));
    assert!(!session.dispatcher().is_registered(req_id));
}
