//! Payment reconciliation.
//!
//! Turns mobile-money gateway traffic (push prompts, status polls and
//! inbound confirmation webhooks) into exactly-once balance credits.
//! [`matcher`] resolves free-form payment references to accounts;
//! [`engine`] owns intent state and the dedupe/credit flow.

pub mod engine;
pub mod matcher;

pub use engine::{NotificationOutcome, PaymentNotification, ReconEngine, ReconError};
pub use matcher::{match_account, normalize_msisdn};
