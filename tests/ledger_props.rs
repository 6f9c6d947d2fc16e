//! Property tests for the ledger's core invariant: the balance always
//! equals the sum of entry deltas, and never goes negative, under any
//! interleaving of credits, reserves, captures and refunds.

use std::sync::Arc;

use proptest::prelude::*;

use smsbilld::ledger::Ledger;
use smsbilld::store::{Account, EntryKind, MemoryStorage, SharedStorage, Storage};

#[derive(Debug, Clone)]
enum Op {
    /// Top-up; a small reference pool forces idempotency hits
    Credit { credits: i64, reference: u8 },
    Reserve { amount: i64 },
    /// Settle a previously issued reservation, picked by index
    Capture { pick: u8 },
    Refund { pick: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..50, 0u8..4).prop_map(|(credits, reference)| Op::Credit { credits, reference }),
        (1i64..20).prop_map(|amount| Op::Reserve { amount }),
        any::<u8>().prop_map(|pick| Op::Capture { pick }),
        any::<u8>().prop_map(|pick| Op::Refund { pick }),
    ]
}

proptest! {
    #[test]
    fn balance_equals_entry_sum_and_never_negative(
        ops in proptest::collection::vec(op_strategy(), 1..80)
    ) {
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let ledger = Ledger::new(storage.clone());
        let account = storage.insert_account(Account::new(None, None));

        let mut correlations: Vec<String> = Vec::new();
        let mut next_corr = 0u32;

        for op in &ops {
            match op {
                Op::Credit { credits, reference } => {
                    let _ = ledger.credit(account, *credits, &format!("r{reference}"), "top-up");
                }
                Op::Reserve { amount } => {
                    let corr = format!("c{next_corr}");
                    next_corr += 1;
                    if ledger.reserve(account, *amount, &corr).is_ok() {
                        correlations.push(corr);
                    }
                }
                Op::Capture { pick } => {
                    if !correlations.is_empty() {
                        let corr = &correlations[*pick as usize % correlations.len()];
                        let _ = ledger.capture(corr);
                    }
                }
                Op::Refund { pick } => {
                    if !correlations.is_empty() {
                        let corr = &correlations[*pick as usize % correlations.len()];
                        let _ = ledger.refund(corr, "prop refund");
                    }
                }
            }

            // Checked after every step, not just at the end.
            let balance = ledger.balance(account).unwrap();
            let sum: i64 = storage
                .entries_for_account(account)
                .iter()
                .map(|e| e.delta)
                .sum();
            prop_assert_eq!(balance, sum);
            prop_assert!(balance >= 0);
        }

        // No reservation ever settles both ways.
        for corr in &correlations {
            let entries = storage.entries_for_correlation(corr);
            let captures = entries.iter().filter(|e| e.kind == EntryKind::Capture).count();
            let refunds = entries.iter().filter(|e| e.kind == EntryKind::Refund).count();
            prop_assert!(captures <= 1);
            prop_assert!(refunds <= 1);
            prop_assert!(captures + refunds <= 1);
        }
    }
}
