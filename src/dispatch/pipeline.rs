//! Send intake: validate, price, reserve, queue.
//!
//! The reservation happens here, synchronously, before the caller gets a
//! response. Whatever happens to the queued job afterwards, the credits are
//! already debited and the worker or sweeper will settle them exactly once.

use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatch::worker::DispatchJob;
use crate::ledger::{Ledger, LedgerError};
use crate::pricing::{self, PricingPolicy};
use crate::store::{AccountId, DispatchId, DispatchRecord, SharedStorage};
use crate::telemetry::counters;

static RECIPIENT_RE: OnceLock<Regex> = OnceLock::new();

/// E.164-ish: optional `+`, 8 to 15 digits, no leading zero.
fn recipient_re() -> &'static Regex {
    RECIPIENT_RE.get_or_init(|| Regex::new(r"^\+?[1-9][0-9]{7,14}$").unwrap())
}

/// Send submission errors. The API maps these to status codes.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("account suspended: {0}")]
    AccountSuspended(AccountId),

    #[error("insufficient credits: balance {balance}, needed {needed}")]
    InsufficientCredits { balance: i64, needed: i64 },

    #[error("dispatch queue full")]
    QueueFull,
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(id) => Self::AccountNotFound(id),
            LedgerError::AccountSuspended(id) => Self::AccountSuspended(id),
            LedgerError::InsufficientCredits { balance, needed } => {
                Self::InsufficientCredits { balance, needed }
            }
            other => Self::InvalidMessage(other.to_string()),
        }
    }
}

/// A validated send request.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub account_id: AccountId,
    pub recipient: String,
    pub text: String,
    /// Falls back to the configured default when unset
    pub sender_id: Option<String>,
}

/// Accepted-send receipt returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SendAccepted {
    pub message_id: DispatchId,
    pub segments: u32,
    pub credits_charged: i64,
    pub new_balance: i64,
    pub status: &'static str,
}

/// Send intake. Shared by API handlers; submission is synchronous up to the
/// queue handoff.
pub struct DispatchPipeline {
    storage: SharedStorage,
    ledger: Arc<Ledger>,
    pricing: Arc<RwLock<PricingPolicy>>,
    queue: mpsc::Sender<DispatchJob>,
    default_sender_id: String,
}

impl DispatchPipeline {
    pub fn new(
        storage: SharedStorage,
        ledger: Arc<Ledger>,
        pricing: Arc<RwLock<PricingPolicy>>,
        queue: mpsc::Sender<DispatchJob>,
        default_sender_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            ledger,
            pricing,
            queue,
            default_sender_id: default_sender_id.into(),
        }
    }

    /// Validate, reserve credits and queue one send.
    ///
    /// A full queue is the one path where the reservation is rolled back
    /// before returning; everything queued is settled by the worker or the
    /// sweeper instead.
    pub fn submit(&self, request: SendRequest) -> Result<SendAccepted, DispatchError> {
        if !recipient_re().is_match(&request.recipient) {
            counters::sms_rejected();
            return Err(DispatchError::InvalidRecipient(request.recipient));
        }

        let segments = pricing::segments_for(&request.text);
        let (cost, max_segments) = {
            let policy = self.pricing.read().unwrap();
            (policy.cost_for(segments), policy.max_segments)
        };
        if segments == 0 {
            counters::sms_rejected();
            return Err(DispatchError::InvalidMessage("empty message".to_string()));
        }
        if segments > max_segments {
            counters::sms_rejected();
            return Err(DispatchError::InvalidMessage(format!(
                "message is {segments} segments, limit is {max_segments}"
            )));
        }

        let id = DispatchId::new();
        let correlation = id.to_string();

        self.ledger
            .reserve(request.account_id, cost, &correlation)
            .map_err(|err| {
                if matches!(err, LedgerError::InsufficientCredits { .. }) {
                    counters::credits_insufficient();
                }
                DispatchError::from(err)
            })?;
        counters::credits_reserved(cost);

        let sender_id = request
            .sender_id
            .unwrap_or_else(|| self.default_sender_id.clone());
        let record = DispatchRecord::new(
            id,
            request.account_id,
            request.recipient,
            sender_id,
            request.text,
            segments,
            cost,
        );
        self.storage.insert_dispatch(record);

        if let Err(err) = self.queue.try_send(DispatchJob { id }) {
            warn!(message = %id, error = %err, "dispatch queue full, rolling back");
            if self.ledger.refund(&correlation, "dispatch queue full").is_ok() {
                counters::credits_refunded(cost);
            }
            self.storage.update_dispatch(
                id,
                Box::new(|r| r.mark_failed(None, "dispatch queue full")),
            );
            counters::sms_failed();
            return Err(DispatchError::QueueFull);
        }

        counters::sms_submitted();
        let new_balance = self
            .ledger
            .balance(request.account_id)
            .map_err(DispatchError::from)?;

        debug!(
            message = %id,
            account = %request.account_id,
            segments,
            cost,
            new_balance,
            "send queued"
        );

        Ok(SendAccepted {
            message_id: id,
            segments,
            credits_charged: cost,
            new_balance,
            status: "queued",
        })
    }
}
