//! The wallet library surface used by [`crate::Wallet`]
//!
//! The production implementation is [`crate::LwkEngine`], backed by [`lwk_wollet::Wollet`].

use lwk_wollet::elements::{
    Address, AssetId, OutPoint, Script, Transaction, TxOut, TxOutSecrets, Txid,
};
use lwk_wollet::secp256k1::SecretKey;
use lwk_wollet::ElementsNetwork;

use crate::model::Utxo;
use crate::Error;

/// Delta produced by a scan
pub trait WalletUpdate: Send {
    /// True if applying the update only moves the tip
    fn only_changes_tip(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Spend every policy asset output to `address`
    Drain { address: Address },
    Pay { address: Address, amount: u64 },
}

impl Recipient {
    pub fn address(&self) -> &Address {
        match self {
            Recipient::Drain { address } | Recipient::Pay { address, .. } => address,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxRequest {
    pub recipient: Recipient,

    /// In sat/kvbyte
    pub fee_rate: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error(transparent)]
    Other(#[from] Error),
}

/// An output of a transaction in the history which belongs to the wallet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnedOutput {
    pub address: Address,
    pub secrets: TxOutSecrets,
}

/// A transaction of the wallet history
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryTx {
    pub txid: Txid,
    pub tx: Transaction,
    pub height: Option<u32>,
    pub timestamp: Option<u32>,

    /// Net change of the policy asset balance
    pub balance_change: i64,

    /// Wallet outputs, aligned with `tx.output`
    pub outputs: Vec<Option<OwnedOutput>>,

    /// True for self-transfers, where every input and output is ours
    pub is_redeposit: bool,
}

pub trait WalletEngine: Send + 'static {
    type Update: WalletUpdate;

    type Pset;

    type Signer: Send + Sync + 'static;

    fn network(&self) -> ElementsNetwork;

    fn policy_asset(&self) -> AssetId {
        self.network().policy_asset()
    }

    /// Must be idempotent
    fn apply_update(&mut self, update: Self::Update) -> Result<(), Error>;

    fn apply_transaction(&mut self, tx: Transaction) -> Result<(), Error>;

    /// External address at `index`
    fn address(&self, index: u32) -> Result<Address, Error>;

    fn utxos(&self) -> Result<Vec<Utxo>, Error>;

    /// Secrets of a wallet output, spent or not
    fn txo_secrets(&self, outpoint: &OutPoint) -> Result<Option<TxOutSecrets>, Error>;

    /// Unblind `txout` with the wallet blinding key of its script
    fn unblind(&self, txout: &TxOut) -> Option<TxOutSecrets>;

    /// Most recent first
    fn transactions(&self, offset: usize, limit: usize) -> Result<Vec<HistoryTx>, Error>;

    fn build(&self, request: &TxRequest) -> Result<Self::Pset, BuildError>;

    fn sign(signer: &Self::Signer, pset: &mut Self::Pset) -> Result<(), Error>;

    fn finalize(&self, pset: &mut Self::Pset) -> Result<Transaction, Error>;

    fn blinding_key(&self, script: &Script) -> Option<SecretKey>;
}
