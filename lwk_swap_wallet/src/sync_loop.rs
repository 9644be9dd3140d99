use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rand::Rng;

use crate::engine::WalletEngine;
use crate::wallet::{Consolidation, Wallet};

const STOP_INTERVAL: Duration = Duration::from_millis(100);

/// Handle of a background thread syncing a wallet, stopped on drop
pub struct SyncLoop {
    is_running: Arc<AtomicBool>,
    completed: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

/// `interval` scaled by a random factor in `[0.75, 1.25)`, wallets sharing a backend would
/// otherwise all hit it at once
pub(crate) fn jittered(interval: Duration) -> Duration {
    interval.mul_f64(rand::thread_rng().gen_range(0.75..1.25))
}

impl<E: WalletEngine> Wallet<E> {
    pub fn start_sync_loop(self: &Arc<Self>) -> SyncLoop {
        let is_running = Arc::new(AtomicBool::new(true));
        let completed = Arc::new(AtomicU64::new(0));
        let wallet = self.clone();
        let thread_running = is_running.clone();
        let thread_completed = completed.clone();

        let handle = std::thread::spawn(move || 'sync: loop {
            // Sleep for the sync interval, but check stop signal every STOP_INTERVAL
            let mut wait = jittered(wallet.sync_interval());
            loop {
                if !thread_running.load(Ordering::Relaxed) {
                    break 'sync;
                }
                if wait.is_zero() {
                    break;
                }
                let step = wait.min(STOP_INTERVAL);
                std::thread::sleep(step);
                wait = wait.saturating_sub(step);
            }

            match wallet.sync() {
                Ok(outcome) => {
                    if let Consolidation::Failed(e) = outcome.consolidation {
                        log::warn!("{}: {e}", wallet.info());
                    }
                }
                Err(e) => log::error!("sync of {} failed: {e}", wallet.info()),
            }
            thread_completed.fetch_add(1, Ordering::Relaxed);
        });

        SyncLoop {
            is_running,
            completed,
            handle: Some(handle),
        }
    }
}

impl SyncLoop {
    /// Number of sync attempts made so far, failed ones included
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait for it, an in-flight sync is completed first
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
