use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use lwk_wollet::elements::{Transaction, Txid};
use lwk_wollet::ElementsNetwork;

use crate::config::{ClientConfig, ClientKey};
use crate::engine::WalletEngine;
use crate::error::ConnectError;
use crate::Error;

/// A connected remote data source
pub trait RemoteClient<E: WalletEngine>: Send + Sync {
    /// Scan the wallet making sure scripts up to `index` are checked even if unused
    ///
    /// Implementations snapshot what they need from `engine` and release the lock before any
    /// network call.
    fn scan_to_index(&self, engine: &Mutex<E>, index: u32) -> Result<Option<E::Update>, Error>;

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error>;
}

/// Creates [`RemoteClient`]s, connecting may block
pub trait Connector<E: WalletEngine>: Send + Sync + 'static {
    fn connect(
        &self,
        config: &ClientConfig,
        network: &ElementsNetwork,
    ) -> Result<Arc<dyn RemoteClient<E>>, Error>;
}

/// Prioritized remote data sources with a cache of connected clients
pub struct BackendPool<E: WalletEngine> {
    network: ElementsNetwork,
    configs: Vec<ClientConfig>,
    connector: Arc<dyn Connector<E>>,
    clients: RwLock<HashMap<ClientKey, Arc<dyn RemoteClient<E>>>>,

    /// Serializes connection creation, not client usage
    connect_lock: Mutex<()>,
    timeout: Duration,
}

impl<E: WalletEngine> BackendPool<E> {
    pub fn new(
        network: ElementsNetwork,
        configs: Vec<ClientConfig>,
        connector: Arc<dyn Connector<E>>,
        timeout: Duration,
    ) -> Self {
        Self {
            network,
            configs,
            connector,
            clients: RwLock::new(HashMap::new()),
            connect_lock: Mutex::new(()),
            timeout,
        }
    }

    /// Configs in priority order
    pub fn configs(&self) -> &[ClientConfig] {
        &self.configs
    }

    pub fn network(&self) -> ElementsNetwork {
        self.network
    }

    // The cache is a plain map updated by single inserts and removals, a panic elsewhere
    // cannot leave it half written
    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<ClientKey, Arc<dyn RemoteClient<E>>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<ClientKey, Arc<dyn RemoteClient<E>>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, key: &ClientKey) -> Option<Arc<dyn RemoteClient<E>>> {
        self.read_cache().get(key).cloned()
    }

    /// Return the cached client for `config`, connecting it first if needed
    pub fn get_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn RemoteClient<E>>, ConnectError> {
        let key = config.key();
        let backend_err = |key: &ClientKey, cause: Error| ConnectError::Backend {
            key: key.clone(),
            cause: Box::new(cause),
        };

        if let Some(client) = self.cached(&key) {
            return Ok(client);
        }

        let _guard = self
            .connect_lock
            .lock()
            .map_err(|e| backend_err(&key, e.into()))?;
        if let Some(client) = self.cached(&key) {
            return Ok(client);
        }

        log::info!("connecting to {}", config.display_url());
        // The channel has room for one message so a late attempt never blocks on send and its
        // result is dropped together with the channel.
        let (sender, receiver) = mpsc::sync_channel(1);
        let connector = self.connector.clone();
        let network = self.network;
        let thread_config = config.clone();
        thread::Builder::new()
            .name(format!("connect {key}"))
            .spawn(move || {
                let _ = sender.send(connector.connect(&thread_config, &network));
            })
            .map_err(|e| backend_err(&key, Error::Generic(e.to_string())))?;

        match receiver.recv_timeout(self.timeout) {
            Ok(Ok(client)) => {
                self.write_cache().insert(key, client.clone());
                Ok(client)
            }
            Ok(Err(e)) => Err(backend_err(&key, e)),
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("connecting to {key} timed out");
                Err(ConnectError::Timeout {
                    key,
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(backend_err(
                &key,
                Error::Generic("connection attempt aborted".to_string()),
            )),
        }
    }

    /// Drop the cached client for `config`, the next use reconnects
    pub fn evict(&self, config: &ClientConfig) {
        self.write_cache().remove(&config.key());
    }

    #[cfg(test)]
    pub(crate) fn poison_cache(&self) {
        let _ = thread::scope(|s| {
            s.spawn(|| {
                let _clients = self.clients.write();
                panic!("client cache poisoned on purpose");
            })
            .join()
        });
        assert!(self.clients.is_poisoned());
    }

    /// Broadcast through the first client that connects
    ///
    /// A rejected broadcast is returned as is, other clients are not tried.
    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        let mut last_err = None;
        for config in &self.configs {
            match self.get_client(config) {
                Ok(client) => return client.broadcast(tx),
                Err(e) => {
                    log::warn!("cannot broadcast with {}: {e}", config.key());
                    last_err = Some(e.into());
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Generic("no client configured".to_string())))
    }
}
