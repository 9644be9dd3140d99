//! [`WalletEngine`] and remote clients backed by the Liquid Wallet Kit

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use lwk_common::{
    derive_blinding_key, singlesig_desc, DescriptorBlindingKey, FileStore, Signer, Singlesig,
};
use lwk_signer::SwSigner;
use lwk_wollet::clients::blocking::{self, BlockchainBackend};
use lwk_wollet::clients::EsploraClientBuilder;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::hashes::{sha256, Hash as _};
use lwk_wollet::elements::{Address, OutPoint, Script, Transaction, TxOut, TxOutSecrets, Txid};
use lwk_wollet::secp256k1::SecretKey;
use lwk_wollet::{
    ElectrumClient, ElectrumUrl, ElementsNetwork, Update, Wollet, WolletBuilder,
    WolletDescriptor, EC,
};

use crate::backend::Backend;
use crate::config::{network_name, ClientConfig};
use crate::engine::{
    BuildError, HistoryTx, OwnedOutput, Recipient, TxRequest, WalletEngine, WalletUpdate,
};
use crate::model::{Utxo, WalletCredentials};
use crate::pool::{Connector, RemoteClient};
use crate::wallet::Wallet;
use crate::Error;

const ESPLORA_CONCURRENCY: usize = 32;

/// Transaction type assigned by [`Wollet`] to self-transfers
const REDEPOSIT: &str = "redeposit";

impl WalletUpdate for Update {
    fn only_changes_tip(&self) -> bool {
        self.only_tip()
    }
}

pub struct LwkEngine {
    wollet: Wollet,
}

impl LwkEngine {
    /// With a `datadir` the wallet reloads its applied updates from there on restart
    ///
    /// Updates are stored in `datadir/<network>/<sha256 of the descriptor>`, so wallets can share
    /// a `datadir`.
    pub fn new(
        network: ElementsNetwork,
        descriptor: &str,
        datadir: Option<&Path>,
    ) -> Result<Self, Error> {
        let descriptor = WolletDescriptor::from_str(descriptor)?;
        let store = match datadir {
            Some(datadir) => {
                let path = datadir
                    .join(network_name(&network))
                    .join(sha256::Hash::hash(descriptor.to_string().as_bytes()).to_string());
                Some(FileStore::new(path)?)
            }
            None => None,
        };
        let builder = WolletBuilder::new(network, descriptor);
        let builder = match store {
            Some(store) => builder.with_store(Arc::new(store)),
            None => builder,
        };
        Ok(Self {
            wollet: builder.build()?,
        })
    }

    pub fn wollet(&self) -> &Wollet {
        &self.wollet
    }
}

impl WalletEngine for LwkEngine {
    type Update = Update;
    type Pset = PartiallySignedTransaction;
    type Signer = SwSigner;

    fn network(&self) -> ElementsNetwork {
        self.wollet.network()
    }

    fn apply_update(&mut self, update: Update) -> Result<(), Error> {
        Ok(self.wollet.apply_update(update)?)
    }

    fn apply_transaction(&mut self, tx: Transaction) -> Result<(), Error> {
        self.wollet.apply_transaction(tx)?;
        Ok(())
    }

    fn address(&self, index: u32) -> Result<Address, Error> {
        Ok(self.wollet.address(Some(index))?.address().clone())
    }

    fn utxos(&self) -> Result<Vec<Utxo>, Error> {
        Ok(self
            .wollet
            .utxos()?
            .into_iter()
            .map(|u| Utxo {
                outpoint: u.outpoint,
                script_pubkey: u.script_pubkey,
                height: u.height,
                secrets: Some(u.unblinded),
            })
            .collect())
    }

    fn txo_secrets(&self, outpoint: &OutPoint) -> Result<Option<TxOutSecrets>, Error> {
        Ok(self
            .wollet
            .txos()?
            .into_iter()
            .find(|t| &t.outpoint == outpoint)
            .map(|t| t.unblinded))
    }

    fn unblind(&self, txout: &TxOut) -> Option<TxOutSecrets> {
        let blinding_key = self.blinding_key(&txout.script_pubkey)?;
        txout.unblind(&EC, blinding_key).ok()
    }

    fn transactions(&self, offset: usize, limit: usize) -> Result<Vec<HistoryTx>, Error> {
        let policy_asset = self.wollet.policy_asset();
        Ok(self
            .wollet
            .transactions_paginated(offset, limit)?
            .into_iter()
            .map(|tx| HistoryTx {
                txid: tx.txid,
                height: tx.height,
                timestamp: tx.timestamp,
                balance_change: tx.balance.get(&policy_asset).copied().unwrap_or(0),
                outputs: tx
                    .outputs
                    .into_iter()
                    .map(|o| {
                        o.map(|o| OwnedOutput {
                            address: o.address,
                            secrets: o.unblinded,
                        })
                    })
                    .collect(),
                is_redeposit: tx.type_ == REDEPOSIT,
                tx: tx.tx,
            })
            .collect())
    }

    fn build(&self, request: &TxRequest) -> Result<PartiallySignedTransaction, BuildError> {
        let builder = self.wollet.tx_builder();
        let builder = match &request.recipient {
            Recipient::Drain { address } => {
                builder.drain_lbtc_wallet().drain_lbtc_to(address.clone())
            }
            Recipient::Pay { address, amount } => builder
                .add_lbtc_recipient(address, *amount)
                .map_err(Error::from)?,
        };
        builder
            .fee_rate(request.fee_rate)
            .finish()
            .map_err(|e| match e {
                lwk_wollet::Error::InsufficientFunds { .. } => BuildError::InsufficientFunds,
                e => BuildError::Other(e.into()),
            })
    }

    fn sign(signer: &SwSigner, pset: &mut PartiallySignedTransaction) -> Result<(), Error> {
        let added = signer.sign(pset)?;
        if added == 0 {
            return Err(Error::Generic("no signature added".to_string()));
        }
        Ok(())
    }

    fn finalize(&self, pset: &mut PartiallySignedTransaction) -> Result<Transaction, Error> {
        Ok(self.wollet.finalize(pset)?)
    }

    fn blinding_key(&self, script: &Script) -> Option<SecretKey> {
        derive_blinding_key(self.wollet.descriptor().ok()?, script)
    }
}

/// A connected Electrum or Esplora client
pub enum LwkClient {
    Electrum(Mutex<ElectrumClient>),
    Esplora(Mutex<blocking::EsploraClient>),
}

impl RemoteClient<LwkEngine> for LwkClient {
    fn scan_to_index(
        &self,
        engine: &Mutex<LwkEngine>,
        index: u32,
    ) -> Result<Option<Update>, Error> {
        let state = engine.lock()?.wollet.state();
        Ok(match self {
            Self::Electrum(c) => c.lock()?.full_scan_to_index(&state, index)?,
            Self::Esplora(c) => c.lock()?.full_scan_to_index(&state, index)?,
        })
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        Ok(match self {
            Self::Electrum(c) => c.lock()?.broadcast(tx)?,
            Self::Esplora(c) => c.lock()?.broadcast(tx)?,
        })
    }
}

pub struct LwkConnector;

impl Connector<LwkEngine> for LwkConnector {
    fn connect(
        &self,
        config: &ClientConfig,
        network: &ElementsNetwork,
    ) -> Result<Arc<dyn RemoteClient<LwkEngine>>, Error> {
        let client = match config {
            ClientConfig::Electrum { url, ssl } => {
                let url = ElectrumUrl::new(url, *ssl, false)
                    .map_err(|e| Error::Generic(format!("invalid electrum url: {e}")))?;
                LwkClient::Electrum(Mutex::new(ElectrumClient::new(&url)?))
            }
            ClientConfig::Esplora { url, waterfall } => {
                let client = EsploraClientBuilder::new(url, *network)
                    .waterfalls(*waterfall)
                    .concurrency(ESPLORA_CONCURRENCY)
                    .build_blocking()?;
                LwkClient::Esplora(Mutex::new(client))
            }
        };
        log::info!("connected to {}", config.display_url());
        Ok(Arc::new(client))
    }
}

fn is_mainnet(network: &ElementsNetwork) -> bool {
    matches!(network, ElementsNetwork::Liquid)
}

/// A fresh BIP39 mnemonic
pub fn generate_mnemonic(network: &ElementsNetwork) -> Result<String, Error> {
    let (_, mnemonic) = SwSigner::random(is_mainnet(network))?;
    Ok(mnemonic.to_string())
}

/// The singlesig segwit descriptor with SLIP-77 blinding key for `mnemonic`
pub fn derive_default_descriptor(
    network: &ElementsNetwork,
    mnemonic: &str,
) -> Result<String, Error> {
    let signer = SwSigner::new(mnemonic, is_mainnet(network))?;
    singlesig_desc(&signer, Singlesig::Wpkh, DescriptorBlindingKey::Slip77).map_err(Error::Generic)
}

/// Open a wallet, readonly if the credentials have no mnemonic
pub fn new_wallet(
    backend: Arc<Backend<LwkEngine>>,
    credentials: &WalletCredentials,
    datadir: Option<&Path>,
) -> Result<Wallet<LwkEngine>, Error> {
    let network = backend.config().network;
    let engine = LwkEngine::new(network, &credentials.descriptor, datadir)?;
    let signer = match &credentials.mnemonic {
        Some(mnemonic) => Some(SwSigner::new(mnemonic, is_mainnet(&network))?),
        None => None,
    };
    Wallet::new(
        backend,
        credentials.id,
        &credentials.name,
        credentials.currency,
        engine,
        signer,
    )
}
