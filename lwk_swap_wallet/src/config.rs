use std::fmt;
use std::time::Duration;

use lwk_wollet::elements::AssetId;
use lwk_wollet::ElementsNetwork;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Time allowed to a remote data source to accept a connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CONSOLIDATION_THRESHOLD: usize = 200;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum fee rate for Liquid transactions, in sat/vbyte
pub const LIQUID_MIN_FEE_RATE: f32 = 0.1;

/// Page size used by history queries when the caller passes a zero limit
pub const DEFAULT_TRANSACTIONS_LIMIT: usize = 100;

const MAINNET_ESPLORA: &str = "https://esplora.bol.tz/liquid";
const REGTEST_ESPLORA: &str = "http://localhost:3003";

/// One remote data source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClientConfig {
    Electrum {
        /// `host:port`, without scheme
        url: String,
        #[serde(default)]
        ssl: bool,
    },
    Esplora {
        url: String,
        #[serde(default)]
        waterfall: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Electrum,
    Esplora,
}

/// Identifies a connected client in the pool cache
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub kind: ClientKind,
    pub url: String,
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ClientKind::Electrum => write!(f, "electrum:{}", self.url),
            ClientKind::Esplora => write!(f, "esplora:{}", self.url),
        }
    }
}

impl ClientConfig {
    pub fn electrum(url: &str, ssl: bool) -> Self {
        ClientConfig::Electrum {
            url: url.to_string(),
            ssl,
        }
    }

    pub fn esplora(url: &str, waterfall: bool) -> Self {
        ClientConfig::Esplora {
            url: url.to_string(),
            waterfall,
        }
    }

    pub fn key(&self) -> ClientKey {
        match self {
            ClientConfig::Electrum { url, .. } => ClientKey {
                kind: ClientKind::Electrum,
                url: url.clone(),
            },
            ClientConfig::Esplora { url, .. } => ClientKey {
                kind: ClientKind::Esplora,
                url: url.clone(),
            },
        }
    }

    /// Url with the scheme the client will actually use
    pub fn display_url(&self) -> String {
        match self {
            ClientConfig::Electrum { url, ssl: true } => format!("ssl://{url}"),
            ClientConfig::Electrum { url, ssl: false } => format!("tcp://{url}"),
            ClientConfig::Esplora { url, .. } => url.clone(),
        }
    }

    /// The source used when a network has none configured
    pub fn default_for(network: &ElementsNetwork) -> Result<Self, Error> {
        match network {
            ElementsNetwork::Liquid => Ok(Self::esplora(MAINNET_ESPLORA, true)),
            ElementsNetwork::ElementsRegtest { .. } => Ok(Self::esplora(REGTEST_ESPLORA, false)),
            _ => Err(Error::MissingBackend(network_name(network).to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub network: ElementsNetwork,

    /// Remote data sources in priority order, the first is preferred
    pub clients: Vec<ClientConfig>,

    /// Number of unspent outputs that triggers a self-sweep after sync
    pub consolidation_threshold: usize,

    pub sync_interval: Duration,

    /// Fee rate floor for consolidations, in sat/vbyte
    pub min_fee_rate: f32,

    pub connect_timeout: Duration,
}

impl Config {
    pub fn default_mainnet() -> Self {
        Self {
            network: ElementsNetwork::Liquid,
            clients: vec![],
            consolidation_threshold: DEFAULT_CONSOLIDATION_THRESHOLD,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            min_fee_rate: LIQUID_MIN_FEE_RATE,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Testnet has no default data source, callers must push one to `clients`
    pub fn default_testnet() -> Self {
        Self {
            network: ElementsNetwork::LiquidTestnet,
            ..Self::default_mainnet()
        }
    }

    pub fn default_regtest(policy_asset: AssetId) -> Self {
        Self {
            network: ElementsNetwork::ElementsRegtest { policy_asset },
            // Sync more frequently while testing
            sync_interval: Duration::from_secs(1),
            ..Self::default_mainnet()
        }
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.clients.push(client);
        self
    }

    /// Configured clients, or the network default when none are set
    pub fn effective_clients(&self) -> Result<Vec<ClientConfig>, Error> {
        if self.clients.is_empty() {
            Ok(vec![ClientConfig::default_for(&self.network)?])
        } else {
            Ok(self.clients.clone())
        }
    }

    /// True if Liquid mainnet
    pub fn is_mainnet(&self) -> bool {
        matches!(self.network, ElementsNetwork::Liquid)
    }
}

pub(crate) fn network_name(network: &ElementsNetwork) -> &'static str {
    match network {
        ElementsNetwork::Liquid => "liquid",
        ElementsNetwork::LiquidTestnet => "liquid-testnet",
        ElementsNetwork::ElementsRegtest { .. } => "liquid-regtest",
    }
}
