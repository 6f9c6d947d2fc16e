//! Prometheus metrics.
//!
//! Counters live behind `OnceLock` and are registered once by
//! [`init_metrics`]. The increment helpers in [`counters`] are no-ops until
//! then, so library code can record metrics unconditionally and tests that
//! never initialize the registry stay silent.

use anyhow::Result;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

static SMS_SUBMITTED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static SMS_SENT_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static SMS_FAILED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static SMS_REJECTED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static SMS_SWEPT_TOTAL: OnceLock<IntCounter> = OnceLock::new();

static CREDITS_RESERVED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static CREDITS_REFUNDED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static CREDITS_TOPPED_UP_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static CREDITS_INSUFFICIENT_TOTAL: OnceLock<IntCounter> = OnceLock::new();

static PAYMENT_NOTIFICATIONS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static PAYMENT_DUPLICATES_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static PAYMENT_UNMATCHED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static PAYMENT_TIMEOUTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static PAYMENT_MALFORMED_TOTAL: OnceLock<IntCounter> = OnceLock::new();

static CONFIG_RELOADS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

fn register(registry: &Registry, slot: &OnceLock<IntCounter>, name: &str, help: &str) -> Result<()> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    let _ = slot.set(counter);
    Ok(())
}

/// Register all counters. Idempotent; later calls are no-ops.
pub fn init_metrics() -> Result<()> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    register(
        &registry,
        &SMS_SUBMITTED_TOTAL,
        "smsbilld_sms_submitted_total",
        "Messages accepted into the dispatch queue",
    )?;
    register(
        &registry,
        &SMS_SENT_TOTAL,
        "smsbilld_sms_sent_total",
        "Messages accepted by the SMS gateway",
    )?;
    register(
        &registry,
        &SMS_FAILED_TOTAL,
        "smsbilld_sms_failed_total",
        "Messages that failed at the gateway and were refunded",
    )?;
    register(
        &registry,
        &SMS_REJECTED_TOTAL,
        "smsbilld_sms_rejected_total",
        "Send requests rejected before reservation",
    )?;
    register(
        &registry,
        &SMS_SWEPT_TOTAL,
        "smsbilld_sms_swept_total",
        "Stuck queued records resolved by the sweeper",
    )?;
    register(
        &registry,
        &CREDITS_RESERVED_TOTAL,
        "smsbilld_credits_reserved_total",
        "Credits reserved for outbound messages",
    )?;
    register(
        &registry,
        &CREDITS_REFUNDED_TOTAL,
        "smsbilld_credits_refunded_total",
        "Credits returned by compensating refunds",
    )?;
    register(
        &registry,
        &CREDITS_TOPPED_UP_TOTAL,
        "smsbilld_credits_topped_up_total",
        "Credits added by verified payments",
    )?;
    register(
        &registry,
        &CREDITS_INSUFFICIENT_TOTAL,
        "smsbilld_credits_insufficient_total",
        "Reservations rejected for insufficient balance",
    )?;
    register(
        &registry,
        &PAYMENT_NOTIFICATIONS_TOTAL,
        "smsbilld_payment_notifications_total",
        "Inbound payment notifications observed",
    )?;
    register(
        &registry,
        &PAYMENT_DUPLICATES_TOTAL,
        "smsbilld_payment_duplicates_total",
        "Redelivered notifications deduplicated",
    )?;
    register(
        &registry,
        &PAYMENT_UNMATCHED_TOTAL,
        "smsbilld_payment_unmatched_total",
        "Payments recorded without an account match",
    )?;
    register(
        &registry,
        &PAYMENT_TIMEOUTS_TOTAL,
        "smsbilld_payment_timeouts_total",
        "Payment intents that exhausted polling",
    )?;
    register(
        &registry,
        &PAYMENT_MALFORMED_TOTAL,
        "smsbilld_payment_malformed_total",
        "Structurally invalid webhook payloads",
    )?;
    register(
        &registry,
        &CONFIG_RELOADS_TOTAL,
        "smsbilld_config_reloads_total",
        "Successful config reloads",
    )?;

    let _ = REGISTRY.set(registry);
    Ok(())
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let Some(registry) = REGISTRY.get() else {
        return Ok(String::new());
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Increment helpers. No-ops until [`init_metrics`] runs.
pub mod counters {
    use super::*;

    fn inc(slot: &OnceLock<IntCounter>) {
        if let Some(c) = slot.get() {
            c.inc();
        }
    }

    fn inc_by(slot: &OnceLock<IntCounter>, n: u64) {
        if let Some(c) = slot.get() {
            c.inc_by(n);
        }
    }

    pub fn sms_submitted() {
        inc(&SMS_SUBMITTED_TOTAL);
    }

    pub fn sms_sent() {
        inc(&SMS_SENT_TOTAL);
    }

    pub fn sms_failed() {
        inc(&SMS_FAILED_TOTAL);
    }

    pub fn sms_rejected() {
        inc(&SMS_REJECTED_TOTAL);
    }

    pub fn sms_swept() {
        inc(&SMS_SWEPT_TOTAL);
    }

    pub fn credits_reserved(amount: i64) {
        inc_by(&CREDITS_RESERVED_TOTAL, amount.max(0) as u64);
    }

    pub fn credits_refunded(amount: i64) {
        inc_by(&CREDITS_REFUNDED_TOTAL, amount.max(0) as u64);
    }

    pub fn credits_topped_up(amount: i64) {
        inc_by(&CREDITS_TOPPED_UP_TOTAL, amount.max(0) as u64);
    }

    pub fn credits_insufficient() {
        inc(&CREDITS_INSUFFICIENT_TOTAL);
    }

    pub fn payment_notification() {
        inc(&PAYMENT_NOTIFICATIONS_TOTAL);
    }

    pub fn payment_duplicate() {
        inc(&PAYMENT_DUPLICATES_TOTAL);
    }

    pub fn payment_unmatched() {
        inc(&PAYMENT_UNMATCHED_TOTAL);
    }

    pub fn payment_timeout() {
        inc(&PAYMENT_TIMEOUTS_TOTAL);
    }

    pub fn payment_malformed() {
        inc(&PAYMENT_MALFORMED_TOTAL);
    }

    pub fn config_reloaded() {
        inc(&CONFIG_RELOADS_TOTAL);
    }
}
