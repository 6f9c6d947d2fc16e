//! Unified storage for all platform state.
//!
//! All state the transactional core touches is managed through the
//! [`Storage`] trait:
//! - **Accounts**: balances and matcher lookup fields
//! - **Ledger entries**: the append-only audit log
//! - **Dispatch records**: send attempts and their lifecycle
//! - **Payment intents**: top-up attempts, matched or not
//!
//! Uniqueness constraints (ledger external reference, payment transaction
//! id) are enforced inside the storage implementation so concurrent callers
//! get a tagged [`InsertOutcome`] instead of a race.
//!
//! [`MemoryStorage`] is the in-process implementation; a database-backed one
//! would slot in behind the same trait.

mod memory;
pub mod types;

pub use memory::MemoryStorage;
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

/// Unified storage trait. All implementations must be thread-safe.
pub trait Storage: Send + Sync {
    // -------------------------------------------------------------------------
    // Account operations
    // -------------------------------------------------------------------------

    /// Store a new account. Returns the account ID.
    fn insert_account(&self, account: Account) -> AccountId;

    /// Get an account by ID.
    fn get_account(&self, id: AccountId) -> Option<Account>;

    /// Update an account in place using a closure.
    fn update_account(&self, id: AccountId, f: Box<dyn FnOnce(&mut Account) + Send>) -> bool;

    /// Accounts registered with this email.
    fn accounts_by_email(&self, email: &str) -> Vec<Account>;

    /// Accounts registered with this canonicalized phone number.
    fn accounts_by_phone(&self, phone: &str) -> Vec<Account>;

    // -------------------------------------------------------------------------
    // Ledger entry operations
    // -------------------------------------------------------------------------

    /// Append a ledger entry.
    fn insert_entry(&self, entry: LedgerEntry) -> EntryId;

    /// Append a ledger entry whose external reference must be unique.
    fn insert_entry_unique(&self, entry: LedgerEntry) -> InsertOutcome<LedgerEntry>;

    /// All entries for an account, oldest first.
    fn entries_for_account(&self, id: AccountId) -> Vec<LedgerEntry>;

    /// All entries sharing a correlation id, oldest first.
    fn entries_for_correlation(&self, correlation: &str) -> Vec<LedgerEntry>;

    /// Look up an entry by its external reference.
    fn entry_by_reference(&self, reference: &str) -> Option<LedgerEntry>;

    /// Set the `Reversed` annotation on an entry.
    fn mark_entry_reversed(&self, id: EntryId) -> bool;

    // -------------------------------------------------------------------------
    // Dispatch record operations
    // -------------------------------------------------------------------------

    /// Store a new dispatch record.
    fn insert_dispatch(&self, record: DispatchRecord) -> DispatchId;

    /// Get a dispatch record by ID.
    fn get_dispatch(&self, id: DispatchId) -> Option<DispatchRecord>;

    /// Get a dispatch record by its gateway-assigned send id.
    fn dispatch_by_external_id(&self, external_id: &str) -> Option<DispatchRecord>;

    /// Update a dispatch record in place using a closure.
    fn update_dispatch(&self, id: DispatchId, f: Box<dyn FnOnce(&mut DispatchRecord) + Send>)
        -> bool;

    /// Queued records older than `older_than` (candidates for the sweeper).
    fn stuck_dispatches(&self, older_than: Duration) -> Vec<DispatchRecord>;

    // -------------------------------------------------------------------------
    // Payment intent operations
    // -------------------------------------------------------------------------

    /// Store a new payment intent (push path; no transaction id yet).
    fn insert_intent(&self, intent: PaymentIntent) -> IntentId;

    /// Store a payment intent whose transaction id must be unique.
    fn insert_intent_unique(&self, intent: PaymentIntent) -> InsertOutcome<PaymentIntent>;

    /// Get an intent by ID.
    fn get_intent(&self, id: IntentId) -> Option<PaymentIntent>;

    /// Get an intent by gateway checkout id.
    fn intent_by_checkout(&self, checkout_id: &str) -> Option<PaymentIntent>;

    /// Get an intent by gateway transaction id.
    fn intent_by_transaction(&self, transaction_id: &str) -> Option<PaymentIntent>;

    /// Update an intent in place using a closure. Implementations refresh
    /// the checkout/transaction indexes afterwards.
    fn update_intent(&self, id: IntentId, f: Box<dyn FnOnce(&mut PaymentIntent) + Send>) -> bool;

    /// Successful payments with no account match (manual-review bucket).
    fn unmatched_intents(&self) -> Vec<PaymentIntent>;

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    /// Get store statistics.
    fn stats(&self) -> StoreStats;
}

/// Shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;
