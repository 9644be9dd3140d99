#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! # Swap Wallet
//!
//! On-chain Liquid wallet backend for swap daemons, built on [`lwk_wollet`].
//!
//! A [`Backend`] is created once per network and shared by its wallets. It owns the remote
//! data sources ([`BackendPool`]), the [`Persister`] of address indexes and optionally a
//! [`ChainProvider`]. Each [`Wallet`] hands out addresses that are never reused, syncs against
//! the first remote source that works, sends funds and consolidates its outputs when they grow
//! past [`Config::consolidation_threshold`].
//!
//! For an entry point see [`new_wallet()`].

mod backend;
mod chain;
mod config;
mod engine;
mod error;
mod lwk;
mod model;
mod persister;
mod pool;
mod sync_loop;
mod wallet;

#[cfg(test)]
mod testing;

pub use crate::backend::Backend;
pub use crate::chain::ChainProvider;
pub use crate::config::{
    ClientConfig, ClientKey, ClientKind, Config, CONNECT_TIMEOUT, DEFAULT_CONSOLIDATION_THRESHOLD,
    DEFAULT_SYNC_INTERVAL, DEFAULT_TRANSACTIONS_LIMIT, LIQUID_MIN_FEE_RATE,
};
pub use crate::engine::{
    BuildError, HistoryTx, OwnedOutput, Recipient, TxRequest, WalletEngine, WalletUpdate,
};
pub use crate::error::{
    ConnectError, ConsolidationError, Error, PersistError, SendError, SyncError,
};
pub use crate::lwk::{
    derive_default_descriptor, generate_mnemonic, new_wallet, LwkClient, LwkConnector, LwkEngine,
};
pub use crate::model::{
    sat_per_kvb, Balance, Currency, Output, TransactionOutput, Utxo, WalletCredentials, WalletId,
    WalletInfo, WalletSendArgs, WalletTransaction,
};
pub use crate::persister::{FilePersister, MemoryPersister, Persister};
pub use crate::pool::{BackendPool, Connector, RemoteClient};
pub use crate::sync_loop::SyncLoop;
pub use crate::wallet::{Consolidation, SyncOutcome, Wallet};

pub use lwk_wollet;
