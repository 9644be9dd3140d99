//! Deterministic doubles for the wallet library, the remote sources and the chain provider
//!
//! Transactions use explicit values and unconfidential p2wsh scripts, the wallet owns the
//! scripts derived by [`own_script`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lwk_wollet::elements::confidential::{
    Asset, AssetBlindingFactor, Nonce, Value, ValueBlindingFactor,
};
use lwk_wollet::elements::encode::deserialize;
use lwk_wollet::elements::hex::FromHex;
use lwk_wollet::elements::{
    Address, AddressParams, AssetId, LockTime, OutPoint, Script, Transaction, TxIn, TxOut,
    TxOutSecrets, TxOutWitness, Txid,
};
use lwk_wollet::hashes::Hash as _;
use lwk_wollet::secp256k1::SecretKey;
use lwk_wollet::ElementsNetwork;

use crate::chain::ChainProvider;
use crate::config::{ClientConfig, Config};
use crate::engine::{
    BuildError, HistoryTx, OwnedOutput, Recipient, TxRequest, WalletEngine, WalletUpdate,
};
use crate::model::Utxo;
use crate::pool::{Connector, RemoteClient};
use crate::Error;

/// Scripts derived per chain by the fake wallet
const DERIVED: u32 = 100;

/// Fee rate used by the fake builder when none is requested, sat/kvbyte
const DEFAULT_FEE_RATE: f32 = 100.0;

pub(crate) fn init_logging() {
    let _ = env_logger::try_init();
}

pub(crate) fn policy_asset() -> AssetId {
    lwk_test_util::regtest_policy_asset()
}

fn params() -> &'static AddressParams {
    &AddressParams::ELEMENTS
}

pub(crate) fn own_script(index: u32, internal: bool) -> Script {
    let mut bytes = vec![0x51, internal as u8];
    bytes.extend(index.to_le_bytes());
    Address::p2wsh(&Script::from(bytes), None, params()).script_pubkey()
}

pub(crate) fn own_address(index: u32, internal: bool) -> Address {
    Address::from_script(&own_script(index, internal), None, params())
        .expect("p2wsh script has an address")
}

/// An address the wallet does not own
pub(crate) fn foreign_address(n: u32) -> Address {
    let mut bytes = vec![0x52];
    bytes.extend(n.to_le_bytes());
    Address::p2wsh(&Script::from(bytes), None, params())
}

fn explicit_output(script_pubkey: Script, value: u64) -> TxOut {
    TxOut {
        asset: Asset::Explicit(policy_asset()),
        value: Value::Explicit(value),
        nonce: Nonce::Null,
        script_pubkey,
        witness: TxOutWitness::default(),
    }
}

fn input(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        ..Default::default()
    }
}

fn secrets(value: u64) -> TxOutSecrets {
    TxOutSecrets::new(
        policy_asset(),
        AssetBlindingFactor::zero(),
        value,
        ValueBlindingFactor::zero(),
    )
}

/// What the remote sources know about the chain
#[derive(Clone, Default)]
pub(crate) struct Remote {
    inner: Arc<Mutex<RemoteState>>,
}

#[derive(Default)]
struct RemoteState {
    txs: Vec<(Transaction, Option<u32>)>,
    height: u32,
    funding: u32,
}

impl Remote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A transaction paying `value` to `address` from an unknown input
    pub(crate) fn funding_tx(&self, address: &Address, value: u64) -> Transaction {
        let mut state = self.inner.lock().unwrap();
        state.funding += 1;
        let txid = Txid::hash(&state.funding.to_le_bytes());
        Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: vec![input(OutPoint::new(txid, 0))],
            output: vec![explicit_output(address.script_pubkey(), value)],
        }
    }

    /// Put a funding transaction in the mempool
    pub(crate) fn fund(&self, address: &str, value: u64) -> Transaction {
        let address: Address = address.parse().unwrap();
        let tx = self.funding_tx(&address, value);
        self.push(tx.clone());
        tx
    }

    pub(crate) fn push(&self, tx: Transaction) {
        let mut state = self.inner.lock().unwrap();
        if !state.txs.iter().any(|(t, _)| t.txid() == tx.txid()) {
            state.txs.push((tx, None));
        }
    }

    /// Confirm every mempool transaction in a new block
    pub(crate) fn mine(&self) {
        let mut state = self.inner.lock().unwrap();
        state.height += 1;
        let height = state.height;
        for (_, h) in state.txs.iter_mut() {
            h.get_or_insert(height);
        }
    }

    pub(crate) fn mempool_len(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.txs.iter().filter(|(_, h)| h.is_none()).count()
    }

    pub(crate) fn tx(&self, txid: &Txid) -> Option<Transaction> {
        let state = self.inner.lock().unwrap();
        state
            .txs
            .iter()
            .find(|(t, _)| &t.txid() == txid)
            .map(|(t, _)| t.clone())
    }

    fn snapshot(&self) -> Vec<(Transaction, Option<u32>)> {
        self.inner.lock().unwrap().txs.clone()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct FakeUpdate {
    pub(crate) txs: Vec<(Transaction, Option<u32>)>,
}

impl WalletUpdate for FakeUpdate {
    fn only_changes_tip(&self) -> bool {
        self.txs.is_empty()
    }
}

pub(crate) struct FakePset {
    tx: Transaction,
    signed: bool,
}

pub(crate) struct FakeSigner;

struct Entry {
    tx: Transaction,
    height: Option<u32>,
    seq: usize,
}

pub(crate) struct FakeEngine {
    network: ElementsNetwork,
    scripts: HashMap<Script, (u32, bool)>,
    txs: HashMap<Txid, Entry>,
    pub(crate) requests: Mutex<Vec<TxRequest>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        let mut scripts = HashMap::new();
        for index in 0..DERIVED {
            for internal in [false, true] {
                scripts.insert(own_script(index, internal), (index, internal));
            }
        }
        Self {
            network: Self::network_regtest(),
            scripts,
            txs: HashMap::new(),
            requests: Mutex::new(vec![]),
        }
    }

    pub(crate) fn network_regtest() -> ElementsNetwork {
        ElementsNetwork::ElementsRegtest {
            policy_asset: policy_asset(),
        }
    }

    /// Regtest config without remote sources
    pub(crate) fn config() -> Config {
        Config::default_regtest(policy_asset())
    }

    pub(crate) fn last_fee_rate(&self) -> Option<Option<f32>> {
        self.requests.lock().unwrap().last().map(|r| r.fee_rate)
    }

    fn is_mine(&self, script: &Script) -> bool {
        self.scripts.contains_key(script)
    }

    fn insert(&mut self, tx: Transaction, height: Option<u32>) {
        let seq = self.txs.len();
        self.txs
            .entry(tx.txid())
            .and_modify(|e| e.height = height)
            .or_insert(Entry { tx, height, seq });
    }

    fn output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.txs
            .get(&outpoint.txid)
            .and_then(|e| e.tx.output.get(outpoint.vout as usize))
    }

    fn owned_value(&self, outpoint: &OutPoint) -> Option<u64> {
        self.output(outpoint)
            .filter(|o| self.is_mine(&o.script_pubkey))
            .and_then(|o| o.value.explicit())
    }

    fn spent(&self) -> Vec<OutPoint> {
        self.txs
            .values()
            .flat_map(|e| e.tx.input.iter().map(|i| i.previous_output))
            .collect()
    }

    fn fee(rate: f32, inputs: usize, outputs: usize) -> u64 {
        let vsize = 10 + 60 * inputs + 40 * outputs;
        ((rate as f64) * vsize as f64 / 1000.0).ceil() as u64
    }

    fn next_change(&self) -> Script {
        let used: Vec<&Script> = self
            .txs
            .values()
            .flat_map(|e| e.tx.output.iter().map(|o| &o.script_pubkey))
            .collect();
        (0..DERIVED)
            .map(|i| own_script(i, true))
            .find(|s| !used.contains(&s))
            .unwrap_or_else(|| own_script(DERIVED, true))
    }
}

impl WalletEngine for FakeEngine {
    type Update = FakeUpdate;
    type Pset = FakePset;
    type Signer = FakeSigner;

    fn network(&self) -> ElementsNetwork {
        self.network
    }

    fn apply_update(&mut self, update: FakeUpdate) -> Result<(), Error> {
        for (tx, height) in update.txs {
            self.insert(tx, height);
        }
        Ok(())
    }

    fn apply_transaction(&mut self, tx: Transaction) -> Result<(), Error> {
        if !self.txs.contains_key(&tx.txid()) {
            self.insert(tx, None);
        }
        Ok(())
    }

    fn address(&self, index: u32) -> Result<Address, Error> {
        Ok(own_address(index, false))
    }

    fn utxos(&self) -> Result<Vec<Utxo>, Error> {
        let spent = self.spent();
        let mut utxos = vec![];
        for (txid, entry) in self.txs.iter() {
            for (vout, output) in entry.tx.output.iter().enumerate() {
                let outpoint = OutPoint::new(*txid, vout as u32);
                if self.is_mine(&output.script_pubkey) && !spent.contains(&outpoint) {
                    utxos.push(Utxo {
                        outpoint,
                        script_pubkey: output.script_pubkey.clone(),
                        height: entry.height,
                        secrets: output.value.explicit().map(secrets),
                    });
                }
            }
        }
        utxos.sort_by(|a, b| {
            let value = |u: &Utxo| u.secrets.as_ref().map(|s| s.value).unwrap_or(0);
            value(b).cmp(&value(a)).then(a.outpoint.cmp(&b.outpoint))
        });
        Ok(utxos)
    }

    fn txo_secrets(&self, outpoint: &OutPoint) -> Result<Option<TxOutSecrets>, Error> {
        Ok(self.owned_value(outpoint).map(secrets))
    }

    fn unblind(&self, txout: &TxOut) -> Option<TxOutSecrets> {
        if self.is_mine(&txout.script_pubkey) {
            txout.value.explicit().map(secrets)
        } else {
            None
        }
    }

    fn transactions(&self, offset: usize, limit: usize) -> Result<Vec<HistoryTx>, Error> {
        let mut entries: Vec<&Entry> = self.txs.values().collect();
        entries.sort_by(|a, b| {
            let height = |e: &Entry| e.height.unwrap_or(u32::MAX);
            height(b).cmp(&height(a)).then(b.seq.cmp(&a.seq))
        });

        let mut history = vec![];
        for entry in entries {
            let tx = &entry.tx;
            let owned_in: Vec<Option<u64>> = tx
                .input
                .iter()
                .map(|i| self.owned_value(&i.previous_output))
                .collect();
            let outputs: Vec<Option<OwnedOutput>> = tx
                .output
                .iter()
                .map(|o| {
                    let (index, internal) = self.scripts.get(&o.script_pubkey)?;
                    Some(OwnedOutput {
                        address: own_address(*index, *internal),
                        secrets: secrets(o.value.explicit()?),
                    })
                })
                .collect();
            if owned_in.iter().all(Option::is_none) && outputs.iter().all(Option::is_none) {
                continue;
            }
            let received: u64 = outputs.iter().flatten().map(|o| o.secrets.value).sum();
            let spent: u64 = owned_in.iter().flatten().sum();
            let is_redeposit = owned_in.iter().all(Option::is_some)
                && tx
                    .output
                    .iter()
                    .zip(outputs.iter())
                    .all(|(o, owned)| o.is_fee() || owned.is_some());
            history.push(HistoryTx {
                txid: tx.txid(),
                tx: tx.clone(),
                height: entry.height,
                timestamp: entry.height.map(|h| 1_700_000_000 + h * 60),
                balance_change: received as i64 - spent as i64,
                outputs,
                is_redeposit,
            });
        }
        Ok(history.into_iter().skip(offset).take(limit).collect())
    }

    fn build(&self, request: &TxRequest) -> Result<FakePset, BuildError> {
        self.requests.lock().unwrap().push(request.clone());
        let rate = request.fee_rate.unwrap_or(DEFAULT_FEE_RATE);
        let utxos = self.utxos()?;
        let value = |u: &Utxo| u.secrets.as_ref().map(|s| s.value).unwrap_or(0);

        let (inputs, outputs) = match &request.recipient {
            Recipient::Drain { address } => {
                let total: u64 = utxos.iter().map(value).sum();
                let fee = Self::fee(rate, utxos.len(), 2);
                if utxos.is_empty() || total <= fee {
                    return Err(BuildError::InsufficientFunds);
                }
                let outputs = vec![
                    explicit_output(address.script_pubkey(), total - fee),
                    TxOut::new_fee(fee, policy_asset()),
                ];
                (utxos, outputs)
            }
            Recipient::Pay { address, amount } => {
                let mut selected = vec![];
                let mut total = 0;
                for utxo in utxos {
                    total += value(&utxo);
                    selected.push(utxo);
                    let fee = Self::fee(rate, selected.len(), 3);
                    if total >= amount + fee {
                        break;
                    }
                }
                let fee = Self::fee(rate, selected.len(), 3);
                if total < amount + fee {
                    return Err(BuildError::InsufficientFunds);
                }
                let mut outputs = vec![explicit_output(address.script_pubkey(), *amount)];
                let change = total - amount - fee;
                if change > 0 {
                    outputs.push(explicit_output(self.next_change(), change));
                }
                outputs.push(TxOut::new_fee(fee, policy_asset()));
                (selected, outputs)
            }
        };

        let tx = Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: inputs.iter().map(|u| input(u.outpoint)).collect(),
            output: outputs,
        };
        Ok(FakePset { tx, signed: false })
    }

    fn sign(_signer: &FakeSigner, pset: &mut FakePset) -> Result<(), Error> {
        pset.signed = true;
        Ok(())
    }

    fn finalize(&self, pset: &mut FakePset) -> Result<Transaction, Error> {
        if !pset.signed {
            return Err(Error::Generic("missing signature".to_string()));
        }
        Ok(pset.tx.clone())
    }

    fn blinding_key(&self, _script: &Script) -> Option<SecretKey> {
        None
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Behavior {
    Ok,
    FailConnect,
    FailScan,
    FailBroadcast,
    Slow(Duration),
}

/// Connects clients to a [`Remote`], one config per behavior
pub(crate) struct FakeConnector {
    remote: Remote,
    behaviors: Vec<Behavior>,

    /// Connection attempts
    pub(crate) connects: AtomicUsize,

    /// Successful connections, late ones included
    pub(crate) connected: AtomicUsize,
    scans: Arc<Mutex<Vec<(String, u32)>>>,
}

impl FakeConnector {
    pub(crate) fn new(remote: Remote, behaviors: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            remote,
            behaviors,
            connects: AtomicUsize::new(0),
            connected: AtomicUsize::new(0),
            scans: Arc::new(Mutex::new(vec![])),
        })
    }

    pub(crate) fn configs(&self) -> Vec<ClientConfig> {
        (0..self.behaviors.len())
            .map(|i| ClientConfig::electrum(&format!("fake{i}:50001"), false))
            .collect()
    }

    /// Url and index of every successful scan
    pub(crate) fn scans(&self) -> Vec<(String, u32)> {
        self.scans.lock().unwrap().clone()
    }
}

impl Connector<FakeEngine> for FakeConnector {
    fn connect(
        &self,
        config: &ClientConfig,
        _network: &ElementsNetwork,
    ) -> Result<Arc<dyn RemoteClient<FakeEngine>>, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let key = config.key();
        let behavior = self
            .configs()
            .iter()
            .position(|c| c == config)
            .and_then(|i| self.behaviors.get(i).copied())
            .ok_or_else(|| Error::Generic(format!("unknown config {key}")))?;
        match behavior {
            Behavior::FailConnect => return Err(Error::Generic("connection refused".to_string())),
            Behavior::Slow(delay) => std::thread::sleep(delay),
            _ => (),
        }
        self.connected.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            url: key.url,
            behavior,
            remote: self.remote.clone(),
            scans: self.scans.clone(),
        }))
    }
}

struct FakeClient {
    url: String,
    behavior: Behavior,
    remote: Remote,
    scans: Arc<Mutex<Vec<(String, u32)>>>,
}

impl RemoteClient<FakeEngine> for FakeClient {
    /// Only transactions the engine does not know at their current height are returned
    fn scan_to_index(
        &self,
        engine: &Mutex<FakeEngine>,
        index: u32,
    ) -> Result<Option<FakeUpdate>, Error> {
        if let Behavior::FailScan = self.behavior {
            return Err(Error::Generic(format!("{} scan failed", self.url)));
        }
        let known: HashMap<Txid, Option<u32>> = engine
            .lock()?
            .txs
            .iter()
            .map(|(txid, e)| (*txid, e.height))
            .collect();
        self.scans.lock()?.push((self.url.clone(), index));
        let txs: Vec<_> = self
            .remote
            .snapshot()
            .into_iter()
            .filter(|(tx, height)| known.get(&tx.txid()) != Some(height))
            .collect();
        Ok((!txs.is_empty()).then_some(FakeUpdate { txs }))
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        if let Behavior::FailBroadcast = self.behavior {
            return Err(Error::Generic("transaction rejected".to_string()));
        }
        self.remote.push(tx.clone());
        Ok(tx.txid())
    }
}

pub(crate) struct FakeChain {
    remote: Remote,
    fee: Mutex<f64>,
    broadcasts: Mutex<Vec<String>>,
}

impl FakeChain {
    pub(crate) fn new(remote: Remote, fee: f64) -> Arc<Self> {
        Arc::new(Self {
            remote,
            fee: Mutex::new(fee),
            broadcasts: Mutex::new(vec![]),
        })
    }

    pub(crate) fn set_fee(&self, fee: f64) {
        *self.fee.lock().unwrap() = fee;
    }

    pub(crate) fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl ChainProvider for FakeChain {
    fn broadcast_transaction(&self, tx_hex: &str) -> Result<Txid, Error> {
        let tx: Transaction = deserialize(&Vec::<u8>::from_hex(tx_hex)?)?;
        self.broadcasts.lock()?.push(tx_hex.to_string());
        self.remote.push(tx.clone());
        Ok(tx.txid())
    }

    fn estimate_fee(&self) -> Result<f64, Error> {
        Ok(*self.fee.lock()?)
    }
}
