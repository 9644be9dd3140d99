use std::fmt;

use lwk_wollet::elements::{AssetId, OutPoint, Script, TxOutSecrets, Txid};
use serde::{Deserialize, Serialize};

/// Key under which the last address index of a wallet is persisted
pub type WalletId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "L-BTC")]
    Lbtc,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Btc => write!(f, "BTC"),
            Currency::Lbtc => write!(f, "L-BTC"),
        }
    }
}

/// What is needed to open a wallet
#[derive(Clone, Debug, Deserialize)]
pub struct WalletCredentials {
    pub id: WalletId,
    pub name: String,
    pub currency: Currency,

    /// CT descriptor of the wallet
    pub descriptor: String,

    /// Without a mnemonic the wallet is readonly
    pub mnemonic: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalletInfo {
    pub id: WalletId,
    pub name: String,
    pub currency: Currency,
    pub readonly: bool,
    pub policy_asset: AssetId,
}

impl fmt::Display for WalletInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wallet{{Id: {}, Name: {}, Currency: {}}}",
            self.id, self.name, self.currency
        )
    }
}

/// An unspent output of the wallet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub script_pubkey: Script,

    /// `None` while unconfirmed
    pub height: Option<u32>,

    /// `None` if the output could not be unblinded
    pub secrets: Option<TxOutSecrets>,
}

impl Utxo {
    /// Value of the output if it is unblinded and of the given asset
    pub fn value_of(&self, asset: AssetId) -> Option<u64> {
        self.secrets
            .as_ref()
            .filter(|s| s.asset == asset)
            .map(|s| s.value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub total: u64,
    pub confirmed: u64,
    pub unconfirmed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransactionOutput {
    pub address: Option<String>,

    /// Zero for outputs that could not be unblinded
    pub amount: u64,
    pub is_our_address: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalletTransaction {
    pub id: Txid,
    pub timestamp: Option<u32>,
    pub block_height: Option<u32>,

    /// Net change of the policy asset balance, fees included
    pub balance_change: i64,
    pub fee: u64,

    /// Outputs excluding the fee output
    pub outputs: Vec<TransactionOutput>,
    pub is_consolidation: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WalletSendArgs {
    pub address: String,

    /// Ignored when `send_all` is set
    pub amount: u64,

    /// `None` lets the transaction builder pick its default
    pub sat_per_vbyte: Option<f64>,

    #[serde(default)]
    pub send_all: bool,
}

impl WalletSendArgs {
    /// Fee rate in the unit expected by the transaction builder (sat/kvbyte)
    pub fn fee_rate(&self) -> Option<f32> {
        self.sat_per_vbyte.map(sat_per_kvb)
    }
}

/// Converts a fee rate in sat/vbyte to sat/kvbyte
pub fn sat_per_kvb(sat_per_vbyte: f64) -> f32 {
    (sat_per_vbyte * 1000.0) as f32
}

/// An unspent output paying to a given address
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Output {
    pub txid: Txid,
    pub value: u64,
}
