use std::sync::{MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::ClientKey;
use crate::model::WalletId;

/// Error type for the swap wallet
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Generic(String),

    #[error("Wollet Error: {0}")]
    Wollet(#[from] lwk_wollet::Error),

    #[error("Signer New Error: {0}")]
    SignerNew(#[from] lwk_signer::NewError),

    #[error("Address Error: {0}")]
    Address(#[from] lwk_wollet::elements::AddressError),

    #[error("Signer Error: {0}")]
    Sign(#[from] lwk_signer::SignError),

    #[error("Hex Error: {0}")]
    Hex(lwk_wollet::elements::hex::Error),

    #[error("Elements Encode Error: {0}")]
    ElementsEncode(lwk_wollet::elements::encode::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Address {address} is for a different network than {expected}")]
    WrongNetwork { address: String, expected: String },

    #[error("No blockchain backend configured for network {0}")]
    MissingBackend(String),

    #[error("Poison error: {0}")]
    PoisonError(String),
}

impl From<lwk_wollet::elements::hex::Error> for Error {
    fn from(value: lwk_wollet::elements::hex::Error) -> Self {
        Error::Hex(value)
    }
}

impl From<lwk_wollet::elements::encode::Error> for Error {
    fn from(value: lwk_wollet::elements::encode::Error) -> Self {
        Error::ElementsEncode(value)
    }
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(e: PoisonError<MutexGuard<'_, T>>) -> Self {
        Error::PoisonError(e.to_string())
    }
}

/// Failure to obtain a connected client from the pool
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connecting to {key} timed out after {timeout:?}")]
    Timeout { key: ClientKey, timeout: Duration },

    #[error("could not connect to {key}: {cause}")]
    Backend { key: ClientKey, cause: Box<Error> },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("all clients failed: {0}")]
    AllBackendsFailed(Box<Error>),

    #[error("could not apply update: {0}")]
    ApplyFailed(Box<Error>),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("wallet is readonly")]
    Readonly,

    #[error("wallet {wallet} has insufficient balance for sending {amount} sats")]
    InsufficientBalance { wallet: WalletId, amount: u64 },

    #[error("could not build transaction: {0}")]
    BuildFailed(Box<Error>),

    #[error("could not sign transaction: {0}")]
    SignFailed(Box<Error>),

    #[error("could not broadcast transaction: {0}")]
    BroadcastFailed(Box<Error>),
}

/// Failure of the automatic self-sweep run after a sync
#[derive(Debug, thiserror::Error)]
#[error("auto consolidation: {0}")]
pub struct ConsolidationError(pub Box<Error>);

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Poison error: {0}")]
    Poisoned(String),
}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for PersistError {
    fn from(e: PoisonError<MutexGuard<'_, T>>) -> Self {
        PersistError::Poisoned(e.to_string())
    }
}

impl Error {
    /// True if this is the domain error raised when the wallet cannot cover a send
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Error::Send(SendError::InsufficientBalance { .. }))
    }
}
