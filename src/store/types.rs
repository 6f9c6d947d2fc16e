//! Types for platform state: accounts, ledger entries, dispatch records,
//! payment intents.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AccountId(u64);

/// Global account ID counter.
pub static ACCOUNT_COUNTER: AtomicU64 = AtomicU64::new(1);

impl AccountId {
    /// Allocate a new unique account ID.
    pub fn new() -> Self {
        Self(ACCOUNT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create an account ID from a raw value.
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc_{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = ();

    /// Accepts both the display form (`acc_42`) and a bare number (`42`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("acc_").unwrap_or(s);
        raw.parse::<u64>().map(Self).map_err(|_| ())
    }
}

/// Unique ledger entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryId(u64);

/// Global entry ID counter.
pub static ENTRY_COUNTER: AtomicU64 = AtomicU64::new(1);

impl EntryId {
    pub fn new() -> Self {
        Self(ENTRY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Unique dispatch record identifier. Doubles as the correlation id linking
/// a record's reserve/capture/refund ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DispatchId(u64);

/// Global dispatch ID counter.
pub static DISPATCH_COUNTER: AtomicU64 = AtomicU64::new(1);

impl DispatchId {
    pub fn new() -> Self {
        Self(DISPATCH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for DispatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sms_{}", self.0)
    }
}

impl FromStr for DispatchId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("sms_").unwrap_or(s);
        raw.parse::<u64>().map(Self).map_err(|_| ())
    }
}

/// Unique payment intent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IntentId(u64);

/// Global intent ID counter.
pub static INTENT_COUNTER: AtomicU64 = AtomicU64::new(1);

impl IntentId {
    pub fn new() -> Self {
        Self(INTENT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pay_{}", self.0)
    }
}

impl FromStr for IntentId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("pay_").unwrap_or(s);
        raw.parse::<u64>().map(Self).map_err(|_| ())
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
}

impl AccountStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

/// A billable customer.
///
/// The balance is mutated only through ledger operations; accounts are never
/// deleted, only suspended.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: AccountId,
    /// Registered email (used by the account matcher)
    pub email: Option<String>,
    /// Registered phone, canonicalized (used by the account matcher)
    pub phone: Option<String>,
    /// Current credit balance; never negative
    pub balance: i64,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: Option<String>, phone: Option<String>) -> Self {
        Self {
            id: AccountId::new(),
            email,
            phone,
            balance: 0,
            status: AccountStatus::Active,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Ledger entries
// =============================================================================

/// Kind of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Provisional debit ahead of a gateway send
    Reserve,
    /// Zero-delta marker finalizing a reservation
    Capture,
    /// Compensating credit reversing a reservation
    Refund,
    /// Balance increase from a verified payment
    Topup,
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Capture => "capture",
            Self::Refund => "refund",
            Self::Topup => "topup",
        }
    }
}

/// Entry status. `Reversed` is an annotation set on a reserve entry by its
/// compensating refund; it never removes the entry's delta from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Reversed,
}

/// Immutable record of a balance change.
///
/// Entries are appended on every ledger mutation and never deleted. The only
/// post-creation mutation is the `Reversed` annotation.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    /// Signed credit delta applied to the balance when written
    pub delta: i64,
    pub kind: EntryKind,
    /// Correlation id linking a dispatch's reserve/capture/refund trio
    pub correlation: Option<String>,
    /// External idempotency key (e.g. gateway transaction id); unique
    pub reference: Option<String>,
    pub description: String,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn base(account_id: AccountId, delta: i64, kind: EntryKind, description: String) -> Self {
        Self {
            id: EntryId::new(),
            account_id,
            delta,
            kind,
            correlation: None,
            reference: None,
            description,
            status: EntryStatus::Completed,
            created_at: Utc::now(),
        }
    }

    /// Provisional debit for an outbound message.
    pub fn reserve(account_id: AccountId, amount: i64, correlation: &str) -> Self {
        let mut entry = Self::base(
            account_id,
            -amount,
            EntryKind::Reserve,
            format!("reserve {amount} credits for {correlation}"),
        );
        entry.correlation = Some(correlation.to_string());
        entry
    }

    /// Zero-delta marker finalizing a reservation.
    pub fn capture(account_id: AccountId, correlation: &str) -> Self {
        let mut entry = Self::base(
            account_id,
            0,
            EntryKind::Capture,
            format!("capture reservation for {correlation}"),
        );
        entry.correlation = Some(correlation.to_string());
        entry
    }

    /// Compensating credit for a failed send.
    pub fn refund(account_id: AccountId, amount: i64, correlation: &str, reason: &str) -> Self {
        let mut entry = Self::base(
            account_id,
            amount,
            EntryKind::Refund,
            format!("refund {amount} credits for {correlation}: {reason}"),
        );
        entry.correlation = Some(correlation.to_string());
        entry
    }

    /// Balance increase from a verified payment.
    pub fn topup(account_id: AccountId, credits: i64, reference: &str, description: &str) -> Self {
        let mut entry = Self::base(
            account_id,
            credits,
            EntryKind::Topup,
            description.to_string(),
        );
        entry.reference = Some(reference.to_string());
        entry
    }
}

// =============================================================================
// Dispatch records
// =============================================================================

/// Dispatch record state.
///
/// `Queued -> Sent -> Delivered` on the happy path; `Queued -> Failed`
/// (refunded) otherwise. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
}

impl DispatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// A message send attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub id: DispatchId,
    pub account_id: AccountId,
    pub recipient: String,
    pub sender_id: String,
    pub text: String,
    pub segments: u32,
    /// Credits reserved for this send
    pub credits: i64,
    /// Gateway-assigned send id, set once accepted
    pub external_id: Option<String>,
    pub status: DispatchStatus,
    /// Set when the reservation was returned via refund
    pub refunded: bool,
    pub error_code: Option<u32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl DispatchRecord {
    pub fn new(
        id: DispatchId,
        account_id: AccountId,
        recipient: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        segments: u32,
        credits: i64,
    ) -> Self {
        Self {
            id,
            account_id,
            recipient: recipient.into(),
            sender_id: sender_id.into(),
            text: text.into(),
            segments,
            credits,
            external_id: None,
            status: DispatchStatus::Queued,
            refunded: false,
            error_code: None,
            error: None,
            created_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            delivered_at: None,
        }
    }

    /// Mark as accepted by the gateway.
    pub fn mark_sent(&mut self, external_id: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = DispatchStatus::Sent;
        self.external_id = Some(external_id.into());
        self.sent_at = Some(Utc::now());
    }

    /// Mark as failed; the reservation has been refunded.
    pub fn mark_failed(&mut self, error_code: Option<u32>, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = DispatchStatus::Failed;
        self.refunded = true;
        self.error_code = error_code;
        self.error = Some(error.into());
        self.failed_at = Some(Utc::now());
    }

    /// Mark as delivered (terminal), driven by a gateway delivery report.
    pub fn mark_delivered(&mut self) {
        if self.status != DispatchStatus::Sent {
            return;
        }
        self.status = DispatchStatus::Delivered;
        self.delivered_at = Some(Utc::now());
    }
}

// =============================================================================
// Payment intents
// =============================================================================

/// Payment intent state. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

/// A top-up attempt, either initiated by us (push) or first observed via an
/// inbound pay-to-merchant notification.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: IntentId,
    /// Unset until the payment is matched to an account
    pub account_id: Option<AccountId>,
    /// Paid amount in minor currency units
    pub amount: i64,
    /// Credits granted, set on successful top-up
    pub credits: Option<i64>,
    /// Gateway checkout id, set for push payments
    pub checkout_id: Option<String>,
    /// Gateway transaction id; the idempotency key
    pub transaction_id: Option<String>,
    /// Payer-supplied reference used for account matching
    pub reference: String,
    pub payer_phone: String,
    pub status: IntentStatus,
    /// Human-readable status detail
    pub detail: Option<String>,
    /// Raw gateway payload, kept for forensics
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    /// Intent created by an outbound push prompt.
    pub fn push(
        account_id: AccountId,
        amount: i64,
        payer_phone: impl Into<String>,
        reference: impl Into<String>,
        checkout_id: impl Into<String>,
    ) -> Self {
        Self {
            id: IntentId::new(),
            account_id: Some(account_id),
            amount,
            credits: None,
            checkout_id: Some(checkout_id.into()),
            transaction_id: None,
            reference: reference.into(),
            payer_phone: payer_phone.into(),
            status: IntentStatus::Pending,
            detail: None,
            raw_payload: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Intent first observed through an inbound notification.
    pub fn inbound(
        amount: i64,
        payer_phone: impl Into<String>,
        reference: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            id: IntentId::new(),
            account_id: None,
            amount,
            credits: None,
            checkout_id: None,
            transaction_id: Some(transaction_id.into()),
            reference: reference.into(),
            payer_phone: payer_phone.into(),
            status: IntentStatus::Pending,
            detail: None,
            raw_payload: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn finish(&mut self, status: IntentStatus, detail: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.detail = detail;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_success(&mut self, detail: impl Into<String>) {
        self.finish(IntentStatus::Success, Some(detail.into()));
    }

    pub fn mark_failed(&mut self, detail: impl Into<String>) {
        self.finish(IntentStatus::Failed, Some(detail.into()));
    }

    pub fn mark_cancelled(&mut self, detail: impl Into<String>) {
        self.finish(IntentStatus::Cancelled, Some(detail.into()));
    }

    pub fn mark_timeout(&mut self) {
        self.finish(
            IntentStatus::Timeout,
            Some("no terminal status before polling deadline".to_string()),
        );
    }
}

// =============================================================================
// Insert outcomes and stats
// =============================================================================

/// Tagged result of a uniqueness-constrained insert. Idempotency hits are a
/// branch, not an exception.
#[derive(Debug, Clone)]
pub enum InsertOutcome<T> {
    Inserted(T),
    AlreadyExists(T),
}

impl<T> InsertOutcome<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Inserted(v) | Self::AlreadyExists(v) => v,
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub accounts: u64,
    pub ledger_entries: u64,
    pub dispatches_queued: u64,
    pub dispatches_sent: u64,
    pub dispatches_delivered: u64,
    pub dispatches_failed: u64,
    pub intents_pending: u64,
    pub intents_success: u64,
    pub intents_failed: u64,
    pub intents_cancelled: u64,
    pub intents_timeout: u64,
    /// Successful payments still awaiting a manual account match
    pub intents_unmatched: u64,
}
