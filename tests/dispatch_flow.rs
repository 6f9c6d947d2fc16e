//! End-to-end dispatch scenarios against the library: reservation,
//! settlement and the no-overdraw guarantee.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use smsbilld::dispatch::{DispatchPipeline, DispatchWorker, SendRequest};
use smsbilld::gateway::mock::MockSmsGateway;
use smsbilld::gateway::SmsGateway;
use smsbilld::ledger::Ledger;
use smsbilld::pricing::PricingPolicy;
use smsbilld::store::{
    Account, AccountId, DispatchId, DispatchStatus, EntryKind, MemoryStorage, SharedStorage,
    Storage,
};

struct Harness {
    storage: SharedStorage,
    ledger: Arc<Ledger>,
    pipeline: Arc<DispatchPipeline>,
    shutdown: watch::Sender<bool>,
}

fn start(gateway: Arc<dyn SmsGateway>) -> Harness {
    let storage: SharedStorage = Arc::new(MemoryStorage::new());
    let ledger = Arc::new(Ledger::new(storage.clone()));
    let pricing = Arc::new(RwLock::new(PricingPolicy::default()));

    let (tx, rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = DispatchWorker::new(
        storage.clone(),
        ledger.clone(),
        gateway,
        rx,
        shutdown_rx,
        8,
        Duration::from_secs(1),
    );
    tokio::spawn(worker.run());

    let pipeline = Arc::new(DispatchPipeline::new(
        storage.clone(),
        ledger.clone(),
        pricing,
        tx,
        "SMSBILL",
    ));

    Harness {
        storage,
        ledger,
        pipeline,
        shutdown: shutdown_tx,
    }
}

fn account_with(h: &Harness, balance: i64) -> AccountId {
    let mut account = Account::new(None, None);
    account.balance = balance;
    h.storage.insert_account(account)
}

fn send(h: &Harness, account_id: AccountId, text: &str) -> Result<DispatchId, smsbilld::dispatch::DispatchError> {
    h.pipeline
        .submit(SendRequest {
            account_id,
            recipient: "+254712345678".to_string(),
            text: text.to_string(),
            sender_id: None,
        })
        .map(|a| a.message_id)
}

async fn wait_settled(h: &Harness, id: DispatchId) -> DispatchStatus {
    for _ in 0..200 {
        let record = h.storage.get_dispatch(id).unwrap();
        if record.status != DispatchStatus::Queued {
            return record.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dispatch never settled");
}

#[tokio::test]
async fn test_successful_send_keeps_the_debit() {
    let h = start(Arc::new(MockSmsGateway::always_success()));
    let account = account_with(&h, 5);

    // Three segments, three credits.
    let id = send(&h, account, &"a".repeat(400)).unwrap();
    assert_eq!(h.ledger.balance(account).unwrap(), 2);

    assert_eq!(wait_settled(&h, id).await, DispatchStatus::Sent);
    assert_eq!(h.ledger.balance(account).unwrap(), 2);

    let entries = h.storage.entries_for_correlation(&id.to_string());
    assert!(entries.iter().any(|e| e.kind == EntryKind::Capture));
    assert!(!entries.iter().any(|e| e.kind == EntryKind::Refund));
}

#[tokio::test]
async fn test_failed_send_refunds_the_debit() {
    let h = start(Arc::new(MockSmsGateway::always_error(8)));
    let account = account_with(&h, 5);

    let id = send(&h, account, &"a".repeat(400)).unwrap();
    assert_eq!(h.ledger.balance(account).unwrap(), 2);

    assert_eq!(wait_settled(&h, id).await, DispatchStatus::Failed);
    assert_eq!(h.ledger.balance(account).unwrap(), 5);

    let record = h.storage.get_dispatch(id).unwrap();
    assert!(record.refunded);
    assert_eq!(record.error_code, Some(8));

    // History keeps both sides of the round trip.
    let entries = h.storage.entries_for_correlation(&id.to_string());
    let deltas: Vec<i64> = entries.iter().map(|e| e.delta).collect();
    assert!(deltas.contains(&-3));
    assert!(deltas.contains(&3));
}

#[tokio::test]
async fn test_concurrent_sends_never_overdraw() {
    let h = start(Arc::new(MockSmsGateway::always_success()));
    let n: i64 = 10;
    let account = account_with(&h, n);

    // Single-segment sends cost 1 each; fire 3x the balance concurrently.
    let mut handles = Vec::new();
    for _ in 0..n * 3 {
        let pipeline = h.pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .submit(SendRequest {
                    account_id: account,
                    recipient: "+254712345678".to_string(),
                    text: "hello".to_string(),
                    sender_id: None,
                })
                .map(|a| a.message_id)
        }));
    }

    let mut accepted = Vec::new();
    for handle in handles {
        if let Ok(id) = handle.await.unwrap() {
            accepted.push(id);
        }
    }

    // Exactly N fit; the balance never went negative.
    assert_eq!(accepted.len() as i64, n);
    assert_eq!(h.ledger.balance(account).unwrap(), 0);

    for id in accepted {
        assert_eq!(wait_settled(&h, id).await, DispatchStatus::Sent);
    }
    assert_eq!(h.ledger.balance(account).unwrap(), 0);
}

#[tokio::test]
async fn test_mixed_outcomes_settle_every_reservation() {
    let h = start(Arc::new(MockSmsGateway::always_error(1)));
    let account = account_with(&h, 4);

    let first = send(&h, account, "hello").unwrap();
    let second = send(&h, account, "hello").unwrap();
    wait_settled(&h, first).await;
    wait_settled(&h, second).await;

    // Both failed and refunded; the full balance is spendable again.
    assert_eq!(h.ledger.balance(account).unwrap(), 4);
    let sum: i64 = h
        .storage
        .entries_for_account(account)
        .iter()
        .map(|e| e.delta)
        .sum();
    assert_eq!(sum, 4 - 4); // two reserves and two refunds, net zero

    h.shutdown.send(true).unwrap();
}
