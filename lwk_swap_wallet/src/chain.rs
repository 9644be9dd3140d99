use lwk_wollet::elements::Txid;

use crate::Error;

/// Chain access the swap daemon already trusts
///
/// When a backend has one, it is used to broadcast every transaction of its wallets and to
/// price consolidations.
pub trait ChainProvider: Send + Sync {
    fn broadcast_transaction(&self, tx_hex: &str) -> Result<Txid, Error>;

    /// Current fee rate estimation in sat/vbyte
    fn estimate_fee(&self) -> Result<f64, Error>;
}
