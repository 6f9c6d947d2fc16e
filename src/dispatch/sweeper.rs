//! Staleness sweeper.
//!
//! A record that stays `Queued` past the cutoff has lost its job (worker
//! crash, channel bug). The sweeper refunds those reservations so no debit
//! is ever stranded behind a message that will never be sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::ledger::{Ledger, RefundOutcome};
use crate::store::SharedStorage;
use crate::telemetry::counters;

/// Periodic sweep loop. Runs until shutdown.
pub async fn run_sweeper(
    storage: SharedStorage,
    ledger: Arc<Ledger>,
    config: DispatchConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(
        interval = ?config.sweep_interval,
        stuck_after = ?config.stuck_after,
        "sweeper started"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let swept = sweep_once(&storage, &ledger, config.stuck_after);
                if swept > 0 {
                    warn!(swept, "refunded stuck dispatches");
                }
            }
        }
    }
    info!("sweeper stopped");
}

/// One pass over stuck records. Returns how many were settled.
pub fn sweep_once(storage: &SharedStorage, ledger: &Ledger, stuck_after: Duration) -> usize {
    let mut swept = 0;
    for record in storage.stuck_dispatches(stuck_after) {
        let correlation = record.id.to_string();
        match ledger.refund(&correlation, "stuck in queue") {
            Ok(RefundOutcome::Refunded(entry)) => {
                counters::credits_refunded(entry.delta);
            }
            Ok(_) => {
                // Settled between the scan and the refund; leave it alone.
                continue;
            }
            Err(err) => {
                warn!(message = %record.id, error = %err, "sweep refund failed");
                continue;
            }
        }

        storage.update_dispatch(
            record.id,
            Box::new(|r| r.mark_failed(None, "stuck in queue")),
        );
        counters::sms_swept();
        counters::sms_failed();
        swept += 1;
    }
    swept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        Account, DispatchId, DispatchRecord, DispatchStatus, MemoryStorage, Storage,
    };

    #[test]
    fn test_sweep_refunds_stuck_records() {
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let ledger = Ledger::new(storage.clone());
        let mut account = Account::new(None, None);
        account.balance = 10;
        let account = storage.insert_account(account);

        let id = DispatchId::new();
        ledger.reserve(account, 2, &id.to_string()).unwrap();
        storage.insert_dispatch(DispatchRecord::new(
            id,
            account,
            "+254712345678",
            "SMSBILL",
            "hi",
            2,
            2,
        ));
        assert_eq!(ledger.balance(account).unwrap(), 8);

        // Zero cutoff makes every queued record stuck.
        assert_eq!(sweep_once(&storage, &ledger, Duration::ZERO), 1);
        assert_eq!(ledger.balance(account).unwrap(), 10);

        let record = storage.get_dispatch(id).unwrap();
        assert_eq!(record.status, DispatchStatus::Failed);
        assert!(record.refunded);

        // A second sweep finds nothing.
        assert_eq!(sweep_once(&storage, &ledger, Duration::ZERO), 0);
    }

    #[test]
    fn test_sweep_skips_fresh_records() {
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let ledger = Ledger::new(storage.clone());
        let mut account = Account::new(None, None);
        account.balance = 10;
        let account = storage.insert_account(account);

        let id = DispatchId::new();
        ledger.reserve(account, 1, &id.to_string()).unwrap();
        storage.insert_dispatch(DispatchRecord::new(
            id,
            account,
            "+254712345678",
            "SMSBILL",
            "hi",
            1,
            1,
        ));

        assert_eq!(sweep_once(&storage, &ledger, Duration::from_secs(600)), 0);
        assert_eq!(ledger.balance(account).unwrap(), 9);
    }
}
