//! Balance snapshots and the background sync task.
//!
//! `BalanceSync` polls the ledger for the session address and publishes
//! snapshots through a watch channel. Consumers observe monotonically
//! non-decreasing `as_of` timestamps; after a confirmed transfer the known
//! delta is applied immediately as a provisional snapshot, which the next
//! authoritative read supersedes.

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BalanceConfig;
use crate::ledger::LedgerQuery;
use crate::types::{RequestId, WalletAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a snapshot's amount came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// Read from the ledger.
    Authoritative,
    /// Locally adjusted after a confirmed transfer, pending the next read.
    Provisional,
}

/// A point-in-time balance for one address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Balance {
    pub address: WalletAddress,
    /// Amount in lamports; non-negative by construction.
    pub lamports: u64,
    /// Snapshot timestamp; non-decreasing across one sync's sequence.
    pub as_of: DateTime<Utc>,
    pub source: BalanceSource,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BALANCE SYNC
// ═══════════════════════════════════════════════════════════════════════════════

/// Background balance polling for the active session's address.
pub struct BalanceSync {
    address: WalletAddress,
    snapshot_tx: watch::Sender<Option<Balance>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    applied_debits: Mutex<HashSet<RequestId>>,
}

impl BalanceSync {
    /// Spawn the poll task for `address` and return the sync handle.
    pub fn start(
        ledger: Arc<dyn LedgerQuery>,
        address: WalletAddress,
        config: BalanceConfig,
    ) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(None);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let sync = Arc::new(Self {
            address: address.clone(),
            snapshot_tx,
            stop_tx,
            task: Mutex::new(None),
            applied_debits: Mutex::new(HashSet::new()),
        });

        let task = tokio::spawn({
            let sync = sync.clone();
            let interval = config.poll_interval();
            async move {
                loop {
                    match ledger.get_balance(&address).await {
                        Ok(lamports) => {
                            sync.publish(lamports, BalanceSource::Authoritative);
                        }
                        Err(e) => {
                            warn!(address = %address, "balance poll failed: {e}");
                        }
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = stop_rx.changed() => break,
                    }
                }
                debug!(address = %address, "balance sync stopped");
            }
        });
        if let Ok(mut slot) = sync.task.lock() {
            *slot = Some(task);
        }

        sync
    }

    /// Address this sync is tracking.
    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    /// Latest snapshot, if any poll has completed.
    pub fn current(&self) -> Option<Balance> {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to the snapshot sequence.
    ///
    /// The sequence is unbounded while the session is live and terminates
    /// (the channel closes) when the session ends.
    pub fn subscribe(&self) -> watch::Receiver<Option<Balance>> {
        self.snapshot_tx.subscribe()
    }

    /// The snapshot sequence as a stream, ending with the session.
    pub fn snapshots(&self) -> BoxStream<'static, Balance> {
        let rx = self.snapshot_tx.subscribe();
        futures::stream::unfold(rx, |mut rx| async move {
            loop {
                rx.changed().await.ok()?;
                let snapshot = rx.borrow_and_update().clone();
                if let Some(balance) = snapshot {
                    return Some((balance, rx));
                }
            }
        })
        .boxed()
    }

    /// Apply the known delta of a confirmed transfer immediately.
    ///
    /// Applied at most once per request id, so a transfer that was already
    /// reconciled is never double-counted. The resulting snapshot is
    /// provisional and superseded by the next authoritative read.
    pub fn apply_confirmed_debit(&self, request_id: &RequestId, lamports: u64) {
        {
            let Ok(mut applied) = self.applied_debits.lock() else {
                return;
            };
            if !applied.insert(request_id.clone()) {
                return;
            }
        }

        let current = self.snapshot_tx.borrow().clone();
        if let Some(balance) = current {
            let adjusted = balance.lamports.saturating_sub(lamports);
            debug!(
                request_id = %request_id,
                from = balance.lamports,
                to = adjusted,
                "applying provisional debit"
            );
            self.publish(adjusted, BalanceSource::Provisional);
        }
    }

    /// Stop polling. The snapshot channel closes once the last reference
    /// to this sync is dropped.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    fn publish(&self, lamports: u64, source: BalanceSource) {
        self.snapshot_tx.send_modify(|slot| {
            // Clamp to the previous timestamp so `as_of` never regresses.
            let now = Utc::now();
            let as_of = match slot.as_ref() {
                Some(prev) if prev.as_of > now => prev.as_of,
                _ => now,
            };
            *slot = Some(Balance {
                address: self.address.clone(),
                lamports,
                as_of,
                source,
            });
        });
    }
}

impl Drop for BalanceSync {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::ledger::{LedgerError, LedgerQuery};
    use crate::types::ProgramConfig;

    struct StubLedger {
        lamports: AtomicU64,
    }

    #[async_trait]
    impl LedgerQuery for StubLedger {
        async fn get_balance(&self, _address: &WalletAddress) -> Result<u64, LedgerError> {
            Ok(self.lamports.load(Ordering::SeqCst))
        }

        async fn get_program_config(&self) -> Result<ProgramConfig, LedgerError> {
            Err(LedgerError("not used".to_string()))
        }
    }

    fn test_address() -> WalletAddress {
        WalletAddress::from_bytes(&[9u8; 32])
    }

    #[tokio::test]
    async fn test_publishes_authoritative_snapshots() {
        let ledger = Arc::new(StubLedger {
            lamports: AtomicU64::new(2_450_000_000),
        });
        let sync = BalanceSync::start(ledger, test_address(), BalanceConfig::default());

        let mut rx = sync.subscribe();
        rx.changed().await.unwrap();
        let balance = rx.borrow().clone().unwrap();
        assert_eq!(balance.lamports, 2_450_000_000);
        assert_eq!(balance.source, BalanceSource::Authoritative);
        sync.stop();
    }

    #[tokio::test]
    async fn test_provisional_debit_applies_once() {
        let ledger = Arc::new(StubLedger {
            lamports: AtomicU64::new(2_450_000_000),
        });
        let sync = BalanceSync::start(ledger, test_address(), BalanceConfig::default());

        let mut rx = sync.subscribe();
        rx.changed().await.unwrap();

        let request_id = RequestId::from("tx-1");
        sync.apply_confirmed_debit(&request_id, 1_000_000_000);
        sync.apply_confirmed_debit(&request_id, 1_000_000_000);

        let balance = sync.current().unwrap();
        assert_eq!(balance.lamports, 1_450_000_000);
        assert_eq!(balance.source, BalanceSource::Provisional);
        sync.stop();
    }

    #[tokio::test]
    async fn test_debit_never_underflows() {
        let ledger = Arc::new(StubLedger {
            lamports: AtomicU64::new(100),
        });
        let sync = BalanceSync::start(ledger, test_address(), BalanceConfig::default());

        let mut rx = sync.subscribe();
        rx.changed().await.unwrap();

        sync.apply_confirmed_debit(&RequestId::from("tx-2"), 500);
        assert_eq!(sync.current().unwrap().lamports, 0);
        sync.stop();
    }

    #[tokio::test]
    async fn test_snapshot_stream_yields_and_terminates() {
        use futures::StreamExt;

        let ledger = Arc::new(StubLedger {
            lamports: AtomicU64::new(500),
        });
        let sync = BalanceSync::start(
            ledger,
            test_address(),
            BalanceConfig {
                poll_interval_ms: 10,
            },
        );

        let mut stream = sync.snapshots();
        let first = stream.next().await.expect("stream should yield");
        assert_eq!(first.lamports, 500);

        // Dropping the sync ends the sequence.
        sync.stop();
        drop(sync);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_as_of_is_monotonic() {
        let ledger = Arc::new(StubLedger {
            lamports: AtomicU64::new(1_000),
        });
        let sync = BalanceSync::start(
            ledger.clone(),
            test_address(),
            BalanceConfig {
                poll_interval_ms: 10,
            },
        );

        let mut rx = sync.subscribe();
        let mut last: Option<DateTime<Utc>> = None;
        for _ in 0..5 {
            rx.changed().await.unwrap();
            let snapshot = rx.borrow().clone().unwrap();
            if let Some(prev) = last {
                assert!(snapshot.as_of >= prev);
            }
            last = Some(snapshot.as_of);
            ledger.lamports.fetch_add(1, Ordering::SeqCst);
        }
        sync.stop();
    }
}
