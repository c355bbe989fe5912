use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IdError;
use crate::request_id::{validate_seed, DEFAULT_ID_SEED};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub dispatcher: DispatcherConfig,
    pub timeouts: RequestTimeouts,
}

/// Gateway/TWS connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway/TWS host. Prefer 127.0.0.1 over localhost, TWS may refuse IPv6.
    pub host: String,
    /// Gateway port (4001 = live, 4002 = paper).
    pub port: u16,
    /// Client ID (unique per connection).
    pub client_id: i32,
    /// How long to wait for the gateway's first `nextValidId` after connecting.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002, // Paper trading by default
            client_id: 100,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl GatewayConfig {
    /// Paper trading configuration.
    #[must_use]
    pub fn paper() -> Self {
        Self::default()
    }

    /// Live trading configuration.
    #[must_use]
    pub fn live() -> Self {
        Self {
            port: 4001,
            ..Self::default()
        }
    }

    /// `host:port` string handed to the gateway SDK.
    #[must_use]
    pub fn connection_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Request bookkeeping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Counter base; the first allocated request id is `id_seed + 1`.
    pub id_seed: i32,
    /// Wait used when a call site does not pass its own timeout.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            id_seed: DEFAULT_ID_SEED,
            default_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatcherConfig {
    /// Rejects seeds the id allocator cannot start from.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidSeed`] for a negative seed or one within
    /// `i32::MAX / 2` of overflow.
    pub fn validate(&self) -> Result<(), IdError> {
        validate_seed(self.id_seed)
    }
}

/// Per-request-kind wait budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTimeouts {
    #[serde(with = "humantime_serde")]
    pub contract_details: Duration,
    #[serde(with = "humantime_serde")]
    pub option_params: Duration,
    #[serde(with = "humantime_serde")]
    pub historical_data: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            contract_details: Duration::from_secs(5),
            option_params: Duration::from_secs(5),
            historical_data: Duration::from_secs(15),
        }
    }
}
