//! Full sync and its scheduling
//!
//! A full sync runs discovery on both chains, then the UTXO and history
//! fetches, then recomputes the receive-address high-water mark and writes
//! the snapshot. At most one runs per wallet: `try_do_full_sync` skips when
//! another is in flight, `sync` waits for it.

use std::sync::{Arc, Weak};
use std::time::Instant;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::ShelleyWallet;
use crate::backend::ChunkedOracle;
use crate::error::Result;
use crate::events::WalletEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// Another sync held the lock
    Skipped,
    /// The wallet was closed while the sync was in flight
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Failed(String),
}

/// Per-wallet exclusion for full syncs
pub struct SyncLock {
    inner: Mutex<()>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self { inner: Mutex::new(()) }
    }

    /// `None` when a sync is already running
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.try_lock().ok()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl Default for SyncLock {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct BackgroundSync {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ShelleyWallet {
    /// Non-blocking entry point for timers and app events
    pub async fn try_do_full_sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.sync_lock.try_acquire() else {
            log::warn!("Sync already in progress for wallet {}, skipping", self.id);
            return Ok(SyncOutcome::Skipped);
        };
        self.run_full_sync().await
    }

    /// Blocking entry point for user-triggered refresh; errors propagate
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let _guard = self.sync_lock.acquire().await;
        self.run_full_sync().await
    }

    /// Drop cached history and UTXOs, then sync from scratch
    pub async fn resync(&self) -> Result<SyncOutcome> {
        let _guard = self.sync_lock.acquire().await;
        log::info!("Resyncing wallet {}", self.id);
        self.transaction_manager.clear().await?;
        self.utxo_manager.clear().await?;
        self.events.notify(&WalletEvent::TransactionsUpdated);
        self.events.notify(&WalletEvent::UtxosUpdated);
        self.run_full_sync().await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync_status.read().clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_lock.is_held()
    }

    // Callers hold the sync lock
    async fn run_full_sync(&self) -> Result<SyncOutcome> {
        if self.is_closed() {
            return Ok(SyncOutcome::Cancelled);
        }

        *self.sync_status.write() = SyncStatus::Syncing;
        let started = Instant::now();
        let result = self.do_full_sync().await;

        *self.sync_status.write() = match &result {
            Ok(_) => SyncStatus::Idle,
            Err(e) => SyncStatus::Failed(e.to_string()),
        };
        match &result {
            Ok(SyncOutcome::Completed) => {
                log::debug!("Wallet {} synced in {:?}", self.id, started.elapsed())
            }
            Ok(outcome) => log::debug!("Wallet {} sync ended: {:?}", self.id, outcome),
            Err(e) => log::warn!("Wallet {} sync failed after {:?}: {}", self.id, started.elapsed(), e),
        }
        result
    }

    async fn do_full_sync(&self) -> Result<SyncOutcome> {
        let oracle = ChunkedOracle::new(
            self.backend.clone(),
            self.config.backend.filter_used_max_addresses,
        );
        let (internal, external) = futures::join!(
            self.internal_chain.sync(&oracle),
            self.external_chain.sync(&oracle)
        );
        let appended = internal? + external?;
        log::debug!("Discovery appended {} addresses", appended);
        if self.is_closed() {
            return Ok(SyncOutcome::Cancelled);
        }

        let addresses: Vec<String> = self
            .internal_chain
            .addresses()
            .into_iter()
            .chain(self.external_chain.addresses())
            .collect();
        let mut blocks = self.internal_chain.get_blocks();
        blocks.extend(self.external_chain.get_blocks());
        blocks.push(vec![self.reward_address_hex.clone()]);

        let (utxos, history) = futures::join!(
            self.utxo_manager.sync(&addresses),
            self.transaction_manager.do_sync(&blocks)
        );
        let utxo_diff = utxos?;
        history?;
        if self.is_closed() {
            return Ok(SyncOutcome::Cancelled);
        }
        if !utxo_diff.is_empty() {
            self.events.notify(&WalletEvent::UtxosUpdated);
        }

        self.update_last_generated_index();
        self.save().await?;
        self.events.notify(&WalletEvent::StateUpdated);
        Ok(SyncOutcome::Completed)
    }

    /// Spawn the background loop. Failures are logged and the next attempt
    /// is scheduled regardless. With background sync disabled a single
    /// attempt runs and nothing is rescheduled.
    pub fn start_sync(self: &Arc<Self>) {
        let mut background = self.background.lock();
        if background.as_ref().is_some_and(|b| !b.handle.is_finished()) {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let weak: Weak<ShelleyWallet> = Arc::downgrade(self);
        let interval = self.config.refresh_interval();
        let repeat = self.config.background_sync;
        log::info!(
            "Starting sync for wallet {} (every {:?}, repeat: {})",
            self.id,
            interval,
            repeat
        );

        let handle = tokio::spawn(async move {
            loop {
                if *stopped.borrow() {
                    break;
                }
                let Some(wallet) = weak.upgrade() else {
                    break;
                };
                if wallet.is_closed() {
                    break;
                }
                if let Err(e) = wallet.try_do_full_sync().await {
                    log::error!("Background sync of wallet {} failed: {}", wallet.id, e);
                }
                drop(wallet);

                if !repeat {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stopped.changed() => break,
                }
            }
        });

        *background = Some(BackgroundSync { stop, handle });
    }

    pub fn stop_sync(&self) {
        if let Some(background) = self.background.lock().take() {
            let _ = background.stop.send(true);
            log::info!("Stopped background sync for wallet {}", self.id);
        }
    }

    pub fn is_background_sync_running(&self) -> bool {
        self.background
            .lock()
            .as_ref()
            .is_some_and(|b| !b.handle.is_finished())
    }
}
