//! Background task that polls the value-time-lock status and reports
//! transitions to whoever is consuming the lock subsystem (Sidetree Core,
//! external to this crate) (§2 row / §4.9 step 5 / §4.15 **[ADDED]**).
//!
//! Started last during startup, after the fee calculator is warm, per
//! §4.9: "Start the lock monitor (must be last — it depends on the fee
//! calculator being warm)."

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::bitcoin_client::BitcoinClient;
use crate::lock::resolver::{LockResolver, LockStatus};
use crate::lock::store::LockTransactionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// The lock is still active, `unlock_height` blocks from genesis.
    Renewed { unlock_height: u32 },
    /// The lock's CLTV height has passed and the collateral is spendable.
    Expired,
    /// No lock transaction has been recorded yet.
    None,
}

pub struct LockMonitor {
    poll_period: Duration,
    events: mpsc::Sender<LockEvent>,
    shutdown: watch::Receiver<bool>,
}

impl LockMonitor {
    pub fn new(poll_period: Duration, events: mpsc::Sender<LockEvent>, shutdown: watch::Receiver<bool>) -> Self {
        LockMonitor {
            poll_period,
            events,
            shutdown,
        }
    }

    /// Runs until the shutdown signal fires, polling the resolver once per
    /// `poll_period` and forwarding one `LockEvent` per tick.
    pub async fn run<C: BitcoinClient>(
        mut self,
        resolver: LockResolver<C>,
        store: impl LockTransactionStore,
    ) -> anyhow::Result<()> {
        loop {
            let event = self.poll_once(&resolver, &store).await?;
            if self.events.send(event).await.is_err() {
                // No receiver left; the monitor has nothing left to report to.
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_period) => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn poll_once<C: BitcoinClient>(
        &self,
        resolver: &LockResolver<C>,
        store: &impl LockTransactionStore,
    ) -> anyhow::Result<LockEvent> {
        let Some(latest) = store.latest().await? else {
            return Ok(LockEvent::None);
        };

        match resolver.resolve(&latest).await? {
            LockStatus::Locked { unlock_height } => Ok(LockEvent::Renewed { unlock_height }),
            LockStatus::Unlockable => Ok(LockEvent::Expired),
            LockStatus::NotFound => Ok(LockEvent::None),
        }
    }
}
