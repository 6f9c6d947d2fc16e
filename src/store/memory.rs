//! In-memory storage implementation.
//!
//! Thread-safe using RwLock-guarded tables with secondary indexes. All data
//! is lost on restart; the sweeper and the ledger's idempotency checks make
//! that loss detectable rather than silent.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;

use super::types::*;
use super::Storage;

/// Ledger entry table with uniqueness and correlation indexes.
#[derive(Default)]
struct EntryTable {
    rows: HashMap<EntryId, LedgerEntry>,
    by_account: HashMap<AccountId, Vec<EntryId>>,
    by_correlation: HashMap<String, Vec<EntryId>>,
    by_reference: HashMap<String, EntryId>,
}

impl EntryTable {
    fn insert(&mut self, entry: LedgerEntry) -> EntryId {
        let id = entry.id;
        self.by_account.entry(entry.account_id).or_default().push(id);
        if let Some(ref correlation) = entry.correlation {
            self.by_correlation
                .entry(correlation.clone())
                .or_default()
                .push(id);
        }
        if let Some(ref reference) = entry.reference {
            self.by_reference.insert(reference.clone(), id);
        }
        self.rows.insert(id, entry);
        id
    }
}

/// Dispatch record table with a gateway-id index.
#[derive(Default)]
struct DispatchTable {
    rows: HashMap<DispatchId, DispatchRecord>,
    by_external: HashMap<String, DispatchId>,
}

/// Payment intent table with checkout/transaction indexes.
#[derive(Default)]
struct IntentTable {
    rows: HashMap<IntentId, PaymentIntent>,
    by_checkout: HashMap<String, IntentId>,
    by_transaction: HashMap<String, IntentId>,
}

impl IntentTable {
    fn insert(&mut self, intent: PaymentIntent) -> IntentId {
        let id = intent.id;
        if let Some(ref checkout) = intent.checkout_id {
            self.by_checkout.insert(checkout.clone(), id);
        }
        if let Some(ref transaction) = intent.transaction_id {
            self.by_transaction.insert(transaction.clone(), id);
        }
        self.rows.insert(id, intent);
        id
    }

    fn reindex(&mut self, id: IntentId) {
        let Some(intent) = self.rows.get(&id) else {
            return;
        };
        if let Some(ref checkout) = intent.checkout_id {
            self.by_checkout.insert(checkout.clone(), id);
        }
        if let Some(ref transaction) = intent.transaction_id {
            self.by_transaction.insert(transaction.clone(), id);
        }
    }
}

/// In-memory storage implementation.
pub struct MemoryStorage {
    accounts: RwLock<HashMap<AccountId, Account>>,
    entries: RwLock<EntryTable>,
    dispatches: RwLock<DispatchTable>,
    intents: RwLock<IntentTable>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            entries: RwLock::new(EntryTable::default()),
            dispatches: RwLock::new(DispatchTable::default()),
            intents: RwLock::new(IntentTable::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn insert_account(&self, account: Account) -> AccountId {
        let id = account.id;
        self.accounts.write().unwrap().insert(id, account);
        id
    }

    fn get_account(&self, id: AccountId) -> Option<Account> {
        self.accounts.read().unwrap().get(&id).cloned()
    }

    fn update_account(&self, id: AccountId, f: Box<dyn FnOnce(&mut Account) + Send>) -> bool {
        let mut accounts = self.accounts.write().unwrap();
        match accounts.get_mut(&id) {
            Some(account) => {
                f(account);
                true
            }
            None => false,
        }
    }

    fn accounts_by_email(&self, email: &str) -> Vec<Account> {
        self.accounts
            .read()
            .unwrap()
            .values()
            .filter(|a| a.email.as_deref() == Some(email))
            .cloned()
            .collect()
    }

    fn accounts_by_phone(&self, phone: &str) -> Vec<Account> {
        self.accounts
            .read()
            .unwrap()
            .values()
            .filter(|a| a.phone.as_deref() == Some(phone))
            .cloned()
            .collect()
    }

    fn insert_entry(&self, entry: LedgerEntry) -> EntryId {
        self.entries.write().unwrap().insert(entry)
    }

    fn insert_entry_unique(&self, entry: LedgerEntry) -> InsertOutcome<LedgerEntry> {
        let mut table = self.entries.write().unwrap();

        // The check and the insert happen under one write lock, so two
        // racing calls with the same reference cannot both insert.
        if let Some(ref reference) = entry.reference {
            if let Some(existing_id) = table.by_reference.get(reference) {
                let existing = table.rows[existing_id].clone();
                return InsertOutcome::AlreadyExists(existing);
            }
        }

        table.insert(entry.clone());
        InsertOutcome::Inserted(entry)
    }

    fn entries_for_account(&self, id: AccountId) -> Vec<LedgerEntry> {
        let table = self.entries.read().unwrap();
        table
            .by_account
            .get(&id)
            .map(|ids| ids.iter().map(|eid| table.rows[eid].clone()).collect())
            .unwrap_or_default()
    }

    fn entries_for_correlation(&self, correlation: &str) -> Vec<LedgerEntry> {
        let table = self.entries.read().unwrap();
        table
            .by_correlation
            .get(correlation)
            .map(|ids| ids.iter().map(|eid| table.rows[eid].clone()).collect())
            .unwrap_or_default()
    }

    fn entry_by_reference(&self, reference: &str) -> Option<LedgerEntry> {
        let table = self.entries.read().unwrap();
        table
            .by_reference
            .get(reference)
            .map(|id| table.rows[id].clone())
    }

    fn mark_entry_reversed(&self, id: EntryId) -> bool {
        let mut table = self.entries.write().unwrap();
        match table.rows.get_mut(&id) {
            Some(entry) => {
                entry.status = EntryStatus::Reversed;
                true
            }
            None => false,
        }
    }

    fn insert_dispatch(&self, record: DispatchRecord) -> DispatchId {
        let id = record.id;
        let mut table = self.dispatches.write().unwrap();
        if let Some(ref external) = record.external_id {
            table.by_external.insert(external.clone(), id);
        }
        table.rows.insert(id, record);
        id
    }

    fn get_dispatch(&self, id: DispatchId) -> Option<DispatchRecord> {
        self.dispatches.read().unwrap().rows.get(&id).cloned()
    }

    fn dispatch_by_external_id(&self, external_id: &str) -> Option<DispatchRecord> {
        let table = self.dispatches.read().unwrap();
        table
            .by_external
            .get(external_id)
            .map(|id| table.rows[id].clone())
    }

    fn update_dispatch(
        &self,
        id: DispatchId,
        f: Box<dyn FnOnce(&mut DispatchRecord) + Send>,
    ) -> bool {
        let mut table = self.dispatches.write().unwrap();
        let Some(record) = table.rows.get_mut(&id) else {
            return false;
        };
        f(record);
        if let Some(external) = record.external_id.clone() {
            table.by_external.insert(external, id);
        }
        true
    }

    fn stuck_dispatches(&self, older_than: Duration) -> Vec<DispatchRecord> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        self.dispatches
            .read()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.status == DispatchStatus::Queued && r.created_at < cutoff)
            .cloned()
            .collect()
    }

    fn insert_intent(&self, intent: PaymentIntent) -> IntentId {
        self.intents.write().unwrap().insert(intent)
    }

    fn insert_intent_unique(&self, intent: PaymentIntent) -> InsertOutcome<PaymentIntent> {
        let mut table = self.intents.write().unwrap();

        if let Some(ref transaction) = intent.transaction_id {
            if let Some(existing_id) = table.by_transaction.get(transaction) {
                let existing = table.rows[existing_id].clone();
                return InsertOutcome::AlreadyExists(existing);
            }
        }

        table.insert(intent.clone());
        InsertOutcome::Inserted(intent)
    }

    fn get_intent(&self, id: IntentId) -> Option<PaymentIntent> {
        self.intents.read().unwrap().rows.get(&id).cloned()
    }

    fn intent_by_checkout(&self, checkout_id: &str) -> Option<PaymentIntent> {
        let table = self.intents.read().unwrap();
        table
            .by_checkout
            .get(checkout_id)
            .map(|id| table.rows[id].clone())
    }

    fn intent_by_transaction(&self, transaction_id: &str) -> Option<PaymentIntent> {
        let table = self.intents.read().unwrap();
        table
            .by_transaction
            .get(transaction_id)
            .map(|id| table.rows[id].clone())
    }

    fn update_intent(&self, id: IntentId, f: Box<dyn FnOnce(&mut PaymentIntent) + Send>) -> bool {
        let mut table = self.intents.write().unwrap();
        let Some(intent) = table.rows.get_mut(&id) else {
            return false;
        };
        f(intent);
        table.reindex(id);
        true
    }

    fn unmatched_intents(&self) -> Vec<PaymentIntent> {
        self.intents
            .read()
            .unwrap()
            .rows
            .values()
            .filter(|i| i.status == IntentStatus::Success && i.account_id.is_none())
            .cloned()
            .collect()
    }

    fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            accounts: self.accounts.read().unwrap().len() as u64,
            ledger_entries: self.entries.read().unwrap().rows.len() as u64,
            ..Default::default()
        };

        for record in self.dispatches.read().unwrap().rows.values() {
            match record.status {
                DispatchStatus::Queued => stats.dispatches_queued += 1,
                DispatchStatus::Sent => stats.dispatches_sent += 1,
                DispatchStatus::Delivered => stats.dispatches_delivered += 1,
                DispatchStatus::Failed => stats.dispatches_failed += 1,
            }
        }

        for intent in self.intents.read().unwrap().rows.values() {
            match intent.status {
                IntentStatus::Pending => stats.intents_pending += 1,
                IntentStatus::Success => {
                    stats.intents_success += 1;
                    if intent.account_id.is_none() {
                        stats.intents_unmatched += 1;
                    }
                }
                IntentStatus::Failed => stats.intents_failed += 1,
                IntentStatus::Cancelled => stats.intents_cancelled += 1,
                IntentStatus::Timeout => stats.intents_timeout += 1,
            }
        }

        stats
    }
}
