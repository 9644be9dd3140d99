use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use lwk_wollet::elements::encode::deserialize;
use lwk_wollet::elements::hex::FromHex;
use lwk_wollet::elements::{Address, AddressParams, AssetId, Transaction, Txid};
use lwk_wollet::secp256k1::SecretKey;

use crate::backend::Backend;
use crate::config::{network_name, DEFAULT_TRANSACTIONS_LIMIT};
use crate::engine::{BuildError, HistoryTx, Recipient, TxRequest, WalletEngine, WalletUpdate};
use crate::error::{ConsolidationError, SendError, SyncError};
use crate::model::{
    Balance, Currency, Output, TransactionOutput, WalletId, WalletInfo, WalletSendArgs,
    WalletTransaction,
};
use crate::Error;

/// What happened to the consolidation check run after a sync
#[derive(Debug)]
pub enum Consolidation {
    NotNeeded,
    Broadcast(Txid),

    /// The sync itself succeeded
    Failed(ConsolidationError),
}

#[derive(Debug)]
pub struct SyncOutcome {
    /// True if the scan returned an update that was applied
    pub applied: bool,
    pub consolidation: Consolidation,
}

/// A confidential wallet bound to a [`Backend`]
///
/// Lock order is send lock, then sync lock or address lock, then engine.
pub struct Wallet<E: WalletEngine> {
    info: WalletInfo,
    backend: Arc<Backend<E>>,
    engine: Mutex<E>,
    signer: Option<E::Signer>,

    /// Held across scan and apply, and across applying a broadcast transaction
    sync_lock: Mutex<()>,

    /// Held across a whole spend, from building to applying
    send_lock: Mutex<()>,

    /// Held from loading the last address index until the next one is persisted
    address_lock: Mutex<()>,
}

impl<E: WalletEngine> Wallet<E> {
    pub fn new(
        backend: Arc<Backend<E>>,
        id: WalletId,
        name: &str,
        currency: Currency,
        engine: E,
        signer: Option<E::Signer>,
    ) -> Result<Self, Error> {
        if currency != Currency::Lbtc {
            return Err(Error::Generic(format!(
                "wallet {id} has currency {currency}, expected {}",
                Currency::Lbtc
            )));
        }
        let network = backend.config().network;
        if engine.network() != network {
            return Err(Error::Generic(format!(
                "wallet {id} is not for network {}",
                network_name(&network)
            )));
        }
        let info = WalletInfo {
            id,
            name: name.to_string(),
            currency,
            readonly: signer.is_none(),
            policy_asset: engine.policy_asset(),
        };
        Ok(Self {
            info,
            backend,
            engine: Mutex::new(engine),
            signer,
            sync_lock: Mutex::new(()),
            send_lock: Mutex::new(()),
            address_lock: Mutex::new(()),
        })
    }

    pub fn info(&self) -> &WalletInfo {
        &self.info
    }

    pub fn is_readonly(&self) -> bool {
        self.info.readonly
    }

    pub fn backend(&self) -> &Arc<Backend<E>> {
        &self.backend
    }

    fn address_params(&self) -> &'static AddressParams {
        self.backend.config().network.address_params()
    }

    fn parse_address(&self, address: &str) -> Result<Address, Error> {
        let parsed = Address::from_str(address)?;
        if parsed.params != self.address_params() {
            return Err(Error::WrongNetwork {
                address: address.to_string(),
                expected: network_name(&self.backend.config().network).to_string(),
            });
        }
        Ok(parsed)
    }

    fn last_index(&self) -> Result<u32, Error> {
        Ok(self
            .backend
            .persister()
            .load_last_index(self.info.id)?
            .unwrap_or(0))
    }

    /// Return an address that was never returned before
    ///
    /// The next index is persisted before the address is returned, so a crash can waste an
    /// index but never hand out the same address twice.
    pub fn new_address(&self) -> Result<String, Error> {
        let _address = self.address_lock.lock()?;
        let index = self.last_index()?;
        let address = self.engine.lock()?.address(index)?;
        let next = index
            .checked_add(1)
            .ok_or_else(|| Error::Generic("address index overflow".to_string()))?;
        self.backend
            .persister()
            .persist_last_index(self.info.id, next)?;
        log::debug!("{} new address at index {index}", self.info);
        Ok(address.to_string())
    }

    /// Scan up to the last used address index and apply the result, then consolidate if
    /// needed
    pub fn sync(&self) -> Result<SyncOutcome, Error> {
        self.scan(false)
    }

    /// Like [`Wallet::sync`] but scanning from index 0, for imports and recoveries
    pub fn full_scan(&self) -> Result<SyncOutcome, Error> {
        self.scan(true)
    }

    fn scan(&self, full: bool) -> Result<SyncOutcome, Error> {
        // Taken first so that a sync and its consolidation run as one unit
        let send = self.send_lock.lock()?;
        let applied = {
            let _sync = self.sync_lock.lock()?;
            let index = if full { 0 } else { self.last_index()? };
            log::debug!("{} scanning to index {index}", self.info);
            match self.scan_with_failover(index)? {
                Some(update) => {
                    if !update.only_changes_tip() {
                        log::debug!("{} received new transactions", self.info);
                    }
                    self.engine
                        .lock()?
                        .apply_update(update)
                        .map_err(|e| SyncError::ApplyFailed(Box::new(e)))?;
                    true
                }
                None => false,
            }
        };

        let consolidation = match self.auto_consolidate(&send) {
            Ok(Some(txid)) => Consolidation::Broadcast(txid),
            Ok(None) => Consolidation::NotNeeded,
            Err(e) => {
                log::warn!("{}: {e}", self.info);
                Consolidation::Failed(e)
            }
        };
        Ok(SyncOutcome {
            applied,
            consolidation,
        })
    }

    fn scan_with_failover(&self, index: u32) -> Result<Option<E::Update>, Error> {
        let pool = self.backend.pool();
        let mut last_err = None;
        for config in pool.configs() {
            let client = match pool.get_client(config) {
                Ok(client) => client,
                Err(e) => {
                    log::warn!("{} cannot use {}: {e}", self.info, config.key());
                    last_err = Some(e.into());
                    continue;
                }
            };
            match client.scan_to_index(&self.engine, index) {
                Ok(update) => return Ok(update),
                Err(e) => {
                    log::warn!("{} scan with {} failed: {e}", self.info, config.key());
                    pool.evict(config);
                    last_err = Some(e);
                }
            }
        }
        let cause = last_err.unwrap_or_else(|| Error::Generic("no client configured".into()));
        Err(SyncError::AllBackendsFailed(Box::new(cause)).into())
    }

    fn auto_consolidate(
        &self,
        send: &MutexGuard<'_, ()>,
    ) -> Result<Option<Txid>, ConsolidationError> {
        self.try_consolidate(send)
            .map_err(|e| ConsolidationError(Box::new(e)))
    }

    fn try_consolidate(&self, send: &MutexGuard<'_, ()>) -> Result<Option<Txid>, Error> {
        let count = self.engine.lock()?.utxos()?.len();
        let threshold = self.backend.config().consolidation_threshold;
        if count < threshold {
            return Ok(None);
        }
        if self.signer.is_none() {
            log::debug!("{} has {count} utxos but is readonly", self.info);
            return Ok(None);
        }
        log::debug!("auto consolidating {} with {count} utxos", self.info);
        let args = WalletSendArgs {
            address: self.new_address()?,
            amount: 0,
            sat_per_vbyte: Some(self.backend.consolidation_fee_rate()?),
            send_all: true,
        };
        let txid = self.send_locked(send, &args)?;
        log::info!("auto consolidated {}: {txid}", self.info);
        Ok(Some(txid))
    }

    /// Build, sign and finalize without broadcasting
    fn create_transaction(&self, args: &WalletSendArgs) -> Result<(Transaction, Address), Error> {
        let signer = self.signer.as_ref().ok_or(SendError::Readonly)?;
        let address = self.parse_address(&args.address)?;
        let recipient = if args.send_all {
            Recipient::Drain {
                address: address.clone(),
            }
        } else {
            Recipient::Pay {
                address: address.clone(),
                amount: args.amount,
            }
        };
        let request = TxRequest {
            recipient,
            fee_rate: args.fee_rate(),
        };

        let engine = self.engine.lock()?;
        let mut pset = engine.build(&request).map_err(|e| match e {
            BuildError::InsufficientFunds => SendError::InsufficientBalance {
                wallet: self.info.id,
                amount: args.amount,
            },
            BuildError::Other(e) => SendError::BuildFailed(Box::new(e)),
        })?;
        E::sign(signer, &mut pset).map_err(|e| SendError::SignFailed(Box::new(e)))?;
        let tx = engine
            .finalize(&mut pset)
            .map_err(|e| SendError::SignFailed(Box::new(e)))?;
        Ok((tx, address))
    }

    /// Send funds, the transaction is part of the wallet state when this returns
    pub fn send_to_address(&self, args: &WalletSendArgs) -> Result<Txid, Error> {
        let send = self.send_lock.lock()?;
        self.send_locked(&send, args)
    }

    fn send_locked(
        &self,
        _send: &MutexGuard<'_, ()>,
        args: &WalletSendArgs,
    ) -> Result<Txid, Error> {
        let (tx, _) = self.create_transaction(args)?;
        let txid = self
            .backend
            .broadcast(&tx)
            .map_err(|e| SendError::BroadcastFailed(Box::new(e)))?;
        log::info!("{} broadcast {txid}", self.info);

        let _sync = self.sync_lock.lock()?;
        self.engine.lock()?.apply_transaction(tx)?;
        Ok(txid)
    }

    /// Amount that would leave the wallet and the fee paid by
    /// [`Wallet::send_to_address`] called with the same arguments
    pub fn get_send_fee(&self, args: &WalletSendArgs) -> Result<(u64, u64), Error> {
        let _send = self.send_lock.lock()?;
        let (tx, recipient) = self.create_transaction(args)?;
        let recipient_script = recipient.script_pubkey();

        let engine = self.engine.lock()?;
        let asset = engine.policy_asset();
        let mut owned_in = 0u64;
        for input in tx.input.iter() {
            if let Some(secrets) = engine.txo_secrets(&input.previous_output)? {
                if secrets.asset == asset {
                    owned_in += secrets.value;
                }
            }
        }
        let fee = fee_of(&tx);
        let change: u64 = tx
            .output
            .iter()
            .filter(|o| !o.is_fee() && o.script_pubkey != recipient_script)
            .filter_map(|o| engine.unblind(o))
            .filter(|s| s.asset == asset)
            .map(|s| s.value)
            .sum();

        let send = owned_in
            .checked_sub(change)
            .and_then(|v| v.checked_sub(fee))
            .ok_or_else(|| Error::Generic("transaction spends more than owned inputs".into()))?;
        Ok((send, fee))
    }

    pub fn get_balance(&self) -> Result<Balance, Error> {
        let engine = self.engine.lock()?;
        let asset = engine.policy_asset();
        let mut balance = Balance::default();
        for utxo in engine.utxos()? {
            if let Some(value) = utxo.value_of(asset) {
                if utxo.height.is_some() {
                    balance.confirmed += value;
                } else {
                    balance.unconfirmed += value;
                }
                balance.total += value;
            }
        }
        Ok(balance)
    }

    /// Most recent first, a zero `limit` means the default page size
    pub fn get_transactions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WalletTransaction>, Error> {
        let limit = if limit == 0 {
            DEFAULT_TRANSACTIONS_LIMIT
        } else {
            limit
        };
        let (txs, asset) = {
            let engine = self.engine.lock()?;
            (engine.transactions(offset, limit)?, engine.policy_asset())
        };
        Ok(txs
            .into_iter()
            .map(|tx| convert_tx(tx, self.address_params(), asset))
            .collect())
    }

    /// Add a transaction created elsewhere, for instance a swap claim, to the wallet state
    pub fn apply_transaction(&self, raw_hex: &str) -> Result<Txid, Error> {
        let bytes = Vec::<u8>::from_hex(raw_hex)?;
        let tx: Transaction = deserialize(&bytes)?;
        let txid = tx.txid();
        let _sync = self.sync_lock.lock()?;
        self.engine.lock()?.apply_transaction(tx)?;
        Ok(txid)
    }

    /// Blinding key the wallet descriptor assigns to the script of `address`
    pub fn derive_blinding_key(&self, address: &str) -> Result<Option<SecretKey>, Error> {
        let address = self.parse_address(address)?;
        Ok(self
            .engine
            .lock()?
            .blinding_key(&address.script_pubkey()))
    }

    /// Unspent outputs paying to `address`
    pub fn get_outputs(&self, address: &str) -> Result<Vec<Output>, Error> {
        let script = self.parse_address(address)?.script_pubkey();
        let engine = self.engine.lock()?;
        let asset = engine.policy_asset();
        Ok(engine
            .utxos()?
            .into_iter()
            .filter(|u| u.script_pubkey == script)
            .map(|u| Output {
                txid: u.outpoint.txid,
                value: u.value_of(asset).unwrap_or(0),
            })
            .collect())
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        self.backend.config().sync_interval
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> MutexGuard<'_, E> {
        self.engine.lock().unwrap()
    }
}

fn fee_of(tx: &Transaction) -> u64 {
    tx.output
        .iter()
        .filter(|o| o.is_fee())
        .filter_map(|o| o.value.explicit())
        .sum()
}

/// Output amounts are in the policy asset, outputs of other assets report 0
fn convert_tx(
    history: HistoryTx,
    params: &'static AddressParams,
    policy_asset: AssetId,
) -> WalletTransaction {
    let fee = fee_of(&history.tx);
    let outputs = history
        .tx
        .output
        .iter()
        .enumerate()
        .filter(|(_, o)| !o.is_fee())
        .map(|(vout, o)| match history.outputs.get(vout).cloned().flatten() {
            Some(owned) => TransactionOutput {
                address: Some(owned.address.to_string()),
                amount: if owned.secrets.asset == policy_asset {
                    owned.secrets.value
                } else {
                    0
                },
                is_our_address: true,
            },
            None => TransactionOutput {
                address: Address::from_script(&o.script_pubkey, None, params)
                    .map(|a| a.to_string()),
                amount: match o.asset.explicit() {
                    Some(asset) if asset == policy_asset => o.value.explicit().unwrap_or(0),
                    _ => 0,
                },
                is_our_address: false,
            },
        })
        .collect();
    WalletTransaction {
        id: history.txid,
        timestamp: history.timestamp,
        block_height: history.height,
        balance_change: history.balance_change,
        fee,
        outputs,
        is_consolidation: history.is_redeposit,
    }
}
