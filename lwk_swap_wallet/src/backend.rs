use std::sync::Arc;

use lwk_wollet::elements::encode::serialize_hex;
use lwk_wollet::elements::{Transaction, Txid};

use crate::chain::ChainProvider;
use crate::config::Config;
use crate::engine::WalletEngine;
use crate::persister::Persister;
use crate::pool::{BackendPool, Connector};
use crate::Error;

/// What the wallets of a network share
pub struct Backend<E: WalletEngine> {
    config: Config,
    pool: BackendPool<E>,
    persister: Arc<dyn Persister>,
    chain: Option<Arc<dyn ChainProvider>>,
}

impl<E: WalletEngine> Backend<E> {
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector<E>>,
        persister: Arc<dyn Persister>,
    ) -> Result<Self, Error> {
        let clients = config.effective_clients()?;
        let pool = BackendPool::new(config.network, clients, connector, config.connect_timeout);
        Ok(Self {
            config,
            pool,
            persister,
            chain: None,
        })
    }

    /// Route broadcasts and fee estimations through `chain`
    pub fn with_chain_provider(mut self, chain: Arc<dyn ChainProvider>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &BackendPool<E> {
        &self.pool
    }

    pub(crate) fn persister(&self) -> &dyn Persister {
        self.persister.as_ref()
    }

    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        match &self.chain {
            Some(chain) => chain.broadcast_transaction(&serialize_hex(tx)),
            None => self.pool.broadcast(tx),
        }
    }

    /// Fee rate for consolidations in sat/vbyte, never below the configured floor
    pub fn consolidation_fee_rate(&self) -> Result<f64, Error> {
        let floor = self.config.min_fee_rate as f64;
        match &self.chain {
            Some(chain) => Ok(chain.estimate_fee()?.max(floor)),
            None => Ok(floor),
        }
    }
}
