//! Credit ledger: the only writer of account balances.
//!
//! Every mutation appends a [`LedgerEntry`] and adjusts the balance in the
//! same per-account critical section, so `balance == sum(entry deltas)`
//! holds at every point in time. Reservation is debit-first: the balance
//! check and the debit are one atomic step, which is what stops two
//! concurrent sends from both passing the check and overdrawing.
//!
//! Compensation is append-only. A refund is a new `+amount` entry (plus a
//! `Reversed` annotation on the reserve), never an update-in-place, so "was
//! this reservation refunded" is an existence query on the correlation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{
    AccountId, EntryKind, InsertOutcome, LedgerEntry, SharedStorage,
};

/// Ledger operation errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("account suspended: {0}")]
    AccountSuspended(AccountId),

    #[error("insufficient credits: balance {balance}, needed {needed}")]
    InsufficientCredits { balance: i64, needed: i64 },

    #[error("no reservation for correlation id: {0}")]
    ReservationNotFound(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
}

/// Result of a capture attempt.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Reservation finalized now
    Captured(LedgerEntry),
    /// A previous capture already finalized it
    AlreadyCaptured,
    /// The reservation was refunded first (e.g. by the sweeper); the capture
    /// is a no-op
    AlreadyRefunded,
}

/// Result of a refund attempt.
#[derive(Debug)]
pub enum RefundOutcome {
    /// Credits returned now
    Refunded(LedgerEntry),
    /// A previous refund already returned them; no balance change
    AlreadyRefunded(LedgerEntry),
    /// The reservation was captured first; nothing to return
    AlreadyCaptured,
}

/// Result of a top-up credit attempt.
#[derive(Debug)]
pub enum CreditOutcome {
    /// Balance increased now
    Credited(LedgerEntry),
    /// The external reference was already credited; no balance change
    Duplicate(LedgerEntry),
}

impl CreditOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Credited(e) | Self::Duplicate(e) => e,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// The credit ledger.
///
/// Operations on one account are serialized through a per-account lock;
/// operations on different accounts proceed in parallel. No lock is held
/// across an await point - all storage access here is synchronous.
pub struct Ledger {
    storage: SharedStorage,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn account_lock(&self, id: AccountId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(id).or_default().clone()
    }

    /// Current balance for an account.
    pub fn balance(&self, account_id: AccountId) -> Result<i64, LedgerError> {
        self.storage
            .get_account(account_id)
            .map(|a| a.balance)
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Reserve `amount` credits for a send identified by `correlation`.
    ///
    /// Decrements the balance immediately; the only operation that checks
    /// sufficiency. Never lets the balance go negative.
    pub fn reserve(
        &self,
        account_id: AccountId,
        amount: i64,
        correlation: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        let account = self
            .storage
            .get_account(account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if !account.status.is_active() {
            return Err(LedgerError::AccountSuspended(account_id));
        }

        if account.balance < amount {
            return Err(LedgerError::InsufficientCredits {
                balance: account.balance,
                needed: amount,
            });
        }

        let entry = LedgerEntry::reserve(account_id, amount, correlation);
        self.storage.insert_entry(entry.clone());
        self.storage
            .update_account(account_id, Box::new(move |a| a.balance -= amount));

        debug!(
            account = %account_id,
            amount,
            correlation,
            balance = account.balance - amount,
            "credits reserved"
        );

        Ok(entry)
    }

    /// Finalize the reservation for `correlation`. No balance change - the
    /// debit already happened at reserve time. Idempotent.
    pub fn capture(&self, correlation: &str) -> Result<CaptureOutcome, LedgerError> {
        let reserve = self.find_reserve(correlation)?;
        let lock = self.account_lock(reserve.account_id);
        let _guard = lock.lock().unwrap();

        // Re-check under the lock: the trio for one correlation id is only
        // ever written while holding this account's lock.
        let entries = self.storage.entries_for_correlation(correlation);
        if entries.iter().any(|e| e.kind == EntryKind::Refund) {
            warn!(correlation, "capture after refund ignored");
            return Ok(CaptureOutcome::AlreadyRefunded);
        }
        if entries.iter().any(|e| e.kind == EntryKind::Capture) {
            return Ok(CaptureOutcome::AlreadyCaptured);
        }

        let entry = LedgerEntry::capture(reserve.account_id, correlation);
        self.storage.insert_entry(entry.clone());

        debug!(account = %reserve.account_id, correlation, "reservation captured");

        Ok(CaptureOutcome::Captured(entry))
    }

    /// Reverse the reservation for `correlation`, returning its credits.
    ///
    /// Idempotent: a second refund for the same correlation id finds the
    /// existing refund entry and changes nothing.
    pub fn refund(&self, correlation: &str, reason: &str) -> Result<RefundOutcome, LedgerError> {
        let reserve = self.find_reserve(correlation)?;
        let account_id = reserve.account_id;
        let amount = -reserve.delta;

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        let entries = self.storage.entries_for_correlation(correlation);
        if let Some(existing) = entries.iter().find(|e| e.kind == EntryKind::Refund) {
            return Ok(RefundOutcome::AlreadyRefunded(existing.clone()));
        }
        if entries.iter().any(|e| e.kind == EntryKind::Capture) {
            warn!(correlation, "refund after capture ignored");
            return Ok(RefundOutcome::AlreadyCaptured);
        }

        let entry = LedgerEntry::refund(account_id, amount, correlation, reason);
        self.storage.insert_entry(entry.clone());
        self.storage
            .update_account(account_id, Box::new(move |a| a.balance += amount));
        self.storage.mark_entry_reversed(reserve.id);

        debug!(account = %account_id, amount, correlation, reason, "reservation refunded");

        Ok(RefundOutcome::Refunded(entry))
    }

    /// Credit a top-up. The external reference is the idempotency key: a
    /// second call with the same reference is a [`CreditOutcome::Duplicate`]
    /// and does not mutate the balance.
    pub fn credit(
        &self,
        account_id: AccountId,
        credits: i64,
        reference: &str,
        description: &str,
    ) -> Result<CreditOutcome, LedgerError> {
        if credits <= 0 {
            return Err(LedgerError::InvalidAmount(credits));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().unwrap();

        // Suspended accounts still receive their money; suspension only
        // blocks spending.
        if self.storage.get_account(account_id).is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let entry = LedgerEntry::topup(account_id, credits, reference, description);
        match self.storage.insert_entry_unique(entry) {
            InsertOutcome::AlreadyExists(existing) => {
                debug!(account = %account_id, reference, "duplicate top-up reference");
                Ok(CreditOutcome::Duplicate(existing))
            }
            InsertOutcome::Inserted(entry) => {
                self.storage
                    .update_account(account_id, Box::new(move |a| a.balance += credits));
                debug!(account = %account_id, credits, reference, "balance credited");
                Ok(CreditOutcome::Credited(entry))
            }
        }
    }

    fn find_reserve(&self, correlation: &str) -> Result<LedgerEntry, LedgerError> {
        self.storage
            .entries_for_correlation(correlation)
            .into_iter()
            .find(|e| e.kind == EntryKind::Reserve)
            .ok_or_else(|| LedgerError::ReservationNotFound(correlation.to_string()))
    }
}
