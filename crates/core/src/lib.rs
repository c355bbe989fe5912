//! Request/response correlation for callback-driven gateway clients.
//!
//! Mints request ids, collects the values a gateway thread delivers for each
//! id, and lets blocking or async call sites wait for completion with a hard
//! timeout. Broker-agnostic; see `ibkr-bridge-ib` for the Interactive Brokers
//! wiring.

pub mod config;
pub mod config_loader;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod outcome;
pub mod request_id;

pub use config::{AppConfig, DispatcherConfig, GatewayConfig, RequestTimeouts};
pub use config_loader::ConfigLoader;
pub use dispatcher::{Dispatcher, Handler, MAX_WAIT};
pub use error::{IdError, WaitError};
pub use events::GatewayEvent;
pub use outcome::WaitOutcome;
pub use request_id::{RequestId, RequestIdAllocator, DEFAULT_ID_SEED, MAX_ID_SEED};
