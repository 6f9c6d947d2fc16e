//! Reconciliation engine.
//!
//! Every top-up, whether we prompted for it (push) or first heard about it
//! through a confirmation webhook, becomes a [`PaymentIntent`] and ends in
//! exactly one terminal state. The gateway transaction id is the idempotency
//! key throughout: a replayed webhook or a poll racing a webhook credits the
//! balance once, and every later sighting is a tagged duplicate.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PaymentsConfig;
use crate::gateway::{GatewayError, MobileMoneyGateway, PushStatus};
use crate::ledger::{CreditOutcome, Ledger};
use crate::pricing::PricingPolicy;
use crate::recon::matcher;
use crate::store::{AccountId, IntentId, PaymentIntent, SharedStorage};
use crate::telemetry::counters;

/// Gateway result code for a completed payment.
pub const RESULT_SUCCESS: u32 = 0;
/// Payer dismissed the payment prompt.
pub const RESULT_CANCELLED: u32 = 1032;
/// Prompt expired without payer action.
pub const RESULT_EXPIRED: u32 = 1037;

/// Reconciliation errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// What happened to one inbound notification. The webhook acks regardless;
/// this drives logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Balance credited now
    Credited { account_id: AccountId, credits: i64 },
    /// Transaction id seen before, nothing changed
    Duplicate,
    /// Payment recorded for manual review, no balance change
    Unmatched,
    /// A pending push intent moved to a terminal failure state
    Resolved,
    /// Non-success notification with no intent to resolve
    Ignored,
    /// Payload missing required fields
    Malformed,
}

/// An inbound confirmation, parsed leniently from the gateway's payload.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    pub transaction_id: Option<String>,
    pub checkout_id: Option<String>,
    /// Paid amount in minor currency units
    pub amount: i64,
    pub reference: String,
    pub payer_phone: String,
    pub result_code: u32,
}

fn first_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| raw.get(k))
        .find_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn amount_minor(v: &Value) -> Option<i64> {
    let units = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some((units * 100.0).round() as i64)
}

fn first_amount(raw: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .filter_map(|k| raw.get(k))
        .find_map(amount_minor)
}

fn result_code(raw: &Value) -> u32 {
    ["ResultCode", "resultCode", "result_code"]
        .iter()
        .filter_map(|k| raw.get(k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_u64().map(|n| n as u32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(RESULT_SUCCESS)
}

impl PaymentNotification {
    /// Parse a gateway payload. Field names vary across the gateway's
    /// webhook flavors, so each field checks its known aliases. Returns
    /// `None` when neither a transaction id nor a checkout id is present,
    /// since such a payload can't be deduplicated or resolved.
    pub fn parse(raw: &Value) -> Option<Self> {
        let transaction_id = first_str(
            raw,
            &["TransID", "MpesaReceiptNumber", "transactionId", "transaction_id"],
        );
        let checkout_id = first_str(raw, &["CheckoutRequestID", "checkoutRequestId", "checkout_id"]);

        if transaction_id.is_none() && checkout_id.is_none() {
            return None;
        }

        Some(Self {
            transaction_id,
            checkout_id,
            amount: first_amount(raw, &["TransAmount", "Amount", "amount"]).unwrap_or(0),
            reference: first_str(raw, &["BillRefNumber", "AccountReference", "reference"])
                .unwrap_or_default(),
            payer_phone: first_str(raw, &["MSISDN", "PhoneNumber", "phoneNumber", "phone"])
                .unwrap_or_default(),
            result_code: result_code(raw),
        })
    }
}

/// The reconciliation engine. Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ReconEngine {
    storage: SharedStorage,
    ledger: Arc<Ledger>,
    gateway: Arc<dyn MobileMoneyGateway>,
    pricing: Arc<RwLock<PricingPolicy>>,
    config: PaymentsConfig,
}

impl ReconEngine {
    pub fn new(
        storage: SharedStorage,
        ledger: Arc<Ledger>,
        gateway: Arc<dyn MobileMoneyGateway>,
        pricing: Arc<RwLock<PricingPolicy>>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            storage,
            ledger,
            gateway,
            pricing,
            config,
        }
    }

    /// Prompt the payer's phone for `amount` and track the attempt.
    ///
    /// Spawns a bounded poller for the resulting checkout. If neither the
    /// poller nor a webhook sees a terminal status within
    /// `poll_max_attempts * poll_interval`, the intent times out.
    #[tracing::instrument(skip(self, payer_phone), fields(account = %account_id))]
    pub async fn initiate(
        &self,
        account_id: AccountId,
        amount: i64,
        payer_phone: &str,
    ) -> Result<PaymentIntent, ReconError> {
        if amount <= 0 {
            return Err(ReconError::InvalidAmount(amount));
        }
        if self.storage.get_account(account_id).is_none() {
            return Err(ReconError::AccountNotFound(account_id));
        }

        let reference = format!("USER-{}", account_id.as_u64());
        let accept = self
            .gateway
            .initiate_push(payer_phone, amount, &reference, &self.config.callback_url)
            .await?;

        let intent = PaymentIntent::push(
            account_id,
            amount,
            payer_phone,
            reference,
            accept.checkout_id.clone(),
        );
        let intent_id = intent.id;
        self.storage.insert_intent(intent.clone());

        info!(
            intent = %intent_id,
            account = %account_id,
            amount,
            checkout = %accept.checkout_id,
            "payment push initiated"
        );

        let engine = self.clone();
        tokio::spawn(engine.poll_push(intent_id, accept.checkout_id));

        Ok(intent)
    }

    /// Poll the gateway until the checkout resolves or the attempt budget
    /// runs out. Stops early when a webhook already resolved the intent.
    async fn poll_push(self, intent_id: IntentId, checkout_id: String) {
        for attempt in 1..=self.config.poll_max_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            let Some(intent) = self.storage.get_intent(intent_id) else {
                return;
            };
            if intent.status.is_terminal() {
                return;
            }

            let status = tokio::time::timeout(
                self.config.query_timeout,
                self.gateway.query_status(&checkout_id),
            )
            .await;

            match status {
                Ok(Ok(PushStatus::Pending)) => {}
                Ok(Ok(PushStatus::Success {
                    transaction_id,
                    amount,
                })) => {
                    self.settle_push(intent_id, &transaction_id, amount);
                    return;
                }
                Ok(Ok(PushStatus::Failed { code, description })) => {
                    self.resolve_push_failure(intent_id, code, &description);
                    return;
                }
                Ok(Err(err)) => {
                    warn!(intent = %intent_id, attempt, error = %err, "status query failed");
                }
                Err(_) => {
                    warn!(intent = %intent_id, attempt, "status query timed out");
                }
            }
        }

        self.storage
            .update_intent(intent_id, Box::new(|i| i.mark_timeout()));
        counters::payment_timeout();
        warn!(intent = %intent_id, checkout = %checkout_id, "payment polling deadline reached");
    }

    /// Credit a completed push. `amount` is the gateway-confirmed figure,
    /// which wins over whatever the intent asked for.
    fn settle_push(
        &self,
        intent_id: IntentId,
        transaction_id: &str,
        amount: i64,
    ) -> NotificationOutcome {
        let Some(intent) = self.storage.get_intent(intent_id) else {
            return NotificationOutcome::Ignored;
        };
        if intent.status.is_terminal() {
            counters::payment_duplicate();
            return NotificationOutcome::Duplicate;
        }
        let Some(account_id) = intent.account_id else {
            return NotificationOutcome::Ignored;
        };

        let txn = transaction_id.to_string();
        self.storage
            .update_intent(intent_id, Box::new(move |i| i.transaction_id = Some(txn)));

        self.credit_account(intent_id, account_id, transaction_id, amount)
    }

    fn resolve_push_failure(&self, intent_id: IntentId, code: u32, description: &str) {
        let detail = format!("gateway result {code}: {description}");
        info!(intent = %intent_id, code, description, "payment push failed");
        self.storage.update_intent(
            intent_id,
            Box::new(move |i| match code {
                RESULT_CANCELLED => i.mark_cancelled(detail),
                RESULT_EXPIRED => i.mark_timeout(),
                _ => i.mark_failed(detail),
            }),
        );
        if code == RESULT_EXPIRED {
            counters::payment_timeout();
        }
    }

    /// Handle an inbound webhook payload.
    ///
    /// Never fails: the gateway retries on anything but an ack, so every
    /// payload is absorbed and the outcome reported through logs and
    /// metrics instead.
    pub fn observe_notification(&self, raw: &Value) -> NotificationOutcome {
        counters::payment_notification();

        let Some(note) = PaymentNotification::parse(raw) else {
            counters::payment_malformed();
            warn!(payload = %raw, "malformed payment notification");
            return NotificationOutcome::Malformed;
        };

        // Webhook for a push we initiated: resolve that intent.
        if let Some(checkout_id) = &note.checkout_id {
            if let Some(intent) = self.storage.intent_by_checkout(checkout_id) {
                return self.resolve_push_notification(intent.id, &note);
            }
        }

        if note.result_code != RESULT_SUCCESS {
            debug!(code = note.result_code, "ignoring non-success notification");
            return NotificationOutcome::Ignored;
        }

        let Some(transaction_id) = note.transaction_id.clone() else {
            counters::payment_malformed();
            warn!(payload = %raw, "success notification without transaction id");
            return NotificationOutcome::Malformed;
        };
        if note.amount <= 0 {
            counters::payment_malformed();
            warn!(transaction = %transaction_id, "success notification without amount");
            return NotificationOutcome::Malformed;
        }

        // Dedupe before creating anything.
        if self.storage.intent_by_transaction(&transaction_id).is_some()
            || self.storage.entry_by_reference(&transaction_id).is_some()
        {
            counters::payment_duplicate();
            debug!(transaction = %transaction_id, "duplicate payment notification");
            return NotificationOutcome::Duplicate;
        }

        let mut intent = PaymentIntent::inbound(
            note.amount,
            note.payer_phone.clone(),
            note.reference.clone(),
            transaction_id.clone(),
        );
        intent.raw_payload = Some(raw.clone());
        let intent = match self.storage.insert_intent_unique(intent) {
            crate::store::InsertOutcome::AlreadyExists(_) => {
                counters::payment_duplicate();
                return NotificationOutcome::Duplicate;
            }
            crate::store::InsertOutcome::Inserted(intent) => intent,
        };

        match matcher::match_account(&self.storage, &note.reference, &note.payer_phone) {
            Some(account_id) => {
                self.storage.update_intent(
                    intent.id,
                    Box::new(move |i| i.account_id = Some(account_id)),
                );
                self.credit_account(intent.id, account_id, &transaction_id, note.amount)
            }
            None => {
                self.storage.update_intent(
                    intent.id,
                    Box::new(|i| i.mark_success("no account match, held for review")),
                );
                counters::payment_unmatched();
                warn!(
                    intent = %intent.id,
                    transaction = %transaction_id,
                    reference = %note.reference,
                    "payment matched no account"
                );
                NotificationOutcome::Unmatched
            }
        }
    }

    fn resolve_push_notification(
        &self,
        intent_id: IntentId,
        note: &PaymentNotification,
    ) -> NotificationOutcome {
        if note.result_code != RESULT_SUCCESS {
            self.resolve_push_failure(intent_id, note.result_code, "reported via callback");
            return NotificationOutcome::Resolved;
        }

        let Some(transaction_id) = &note.transaction_id else {
            counters::payment_malformed();
            warn!(intent = %intent_id, "success callback without transaction id");
            return NotificationOutcome::Malformed;
        };
        self.settle_push(intent_id, transaction_id, note.amount)
    }

    /// The single place balances grow. Converts the paid amount to credits
    /// under the current pricing policy and leans on the ledger's reference
    /// uniqueness for the final dedupe.
    fn credit_account(
        &self,
        intent_id: IntentId,
        account_id: AccountId,
        transaction_id: &str,
        amount: i64,
    ) -> NotificationOutcome {
        let credits = self.pricing.read().unwrap().credits_for_amount(amount);
        if credits <= 0 {
            warn!(
                intent = %intent_id,
                amount,
                "paid amount below one credit, holding for review"
            );
            self.storage.update_intent(
                intent_id,
                Box::new(|i| i.mark_failed("paid amount below one credit")),
            );
            return NotificationOutcome::Ignored;
        }

        match self
            .ledger
            .credit(account_id, credits, transaction_id, "mobile money top-up")
        {
            Ok(CreditOutcome::Credited(_)) => {
                self.storage.update_intent(
                    intent_id,
                    Box::new(move |i| {
                        i.credits = Some(credits);
                        i.mark_success("credited");
                    }),
                );
                counters::credits_topped_up(credits);
                info!(
                    intent = %intent_id,
                    account = %account_id,
                    transaction = %transaction_id,
                    amount,
                    credits,
                    "top-up credited"
                );
                NotificationOutcome::Credited {
                    account_id,
                    credits,
                }
            }
            Ok(CreditOutcome::Duplicate(_)) => {
                self.storage.update_intent(
                    intent_id,
                    Box::new(move |i| {
                        i.credits = Some(credits);
                        i.mark_success("already credited");
                    }),
                );
                counters::payment_duplicate();
                debug!(transaction = %transaction_id, "transaction already credited");
                NotificationOutcome::Duplicate
            }
            Err(err) => {
                warn!(
                    intent = %intent_id,
                    account = %account_id,
                    error = %err,
                    "credit failed, holding for review"
                );
                let detail = err.to_string();
                self.storage
                    .update_intent(intent_id, Box::new(move |i| i.mark_failed(detail)));
                NotificationOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockMoneyGateway;
    use crate::store::{Account, IntentStatus, MemoryStorage, Storage};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: Arc<ReconEngine>,
        storage: SharedStorage,
        ledger: Arc<Ledger>,
        gateway: Arc<MockMoneyGateway>,
    }

    fn fixture() -> Fixture {
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let ledger = Arc::new(Ledger::new(storage.clone()));
        let gateway = Arc::new(MockMoneyGateway::pending());
        let config = PaymentsConfig {
            poll_interval: Duration::from_millis(10),
            poll_max_attempts: 5,
            query_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let engine = Arc::new(ReconEngine::new(
            storage.clone(),
            ledger.clone(),
            gateway.clone(),
            Arc::new(RwLock::new(PricingPolicy::default())),
            config,
        ));
        Fixture {
            engine,
            storage,
            ledger,
            gateway,
        }
    }

    fn add_account(fx: &Fixture, email: &str, phone: &str) -> AccountId {
        fx.storage
            .insert_account(Account::new(Some(email.to_string()), Some(phone.to_string())))
    }

    async fn wait_for_terminal(fx: &Fixture, id: IntentId) -> PaymentIntent {
        for _ in 0..100 {
            let intent = fx.storage.get_intent(id).unwrap();
            if intent.status.is_terminal() {
                return intent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("intent never reached a terminal state");
    }

    #[tokio::test]
    async fn test_push_polled_to_success() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");

        let intent = fx
            .engine
            .initiate(account, 100_000, "254712345678")
            .await
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);

        fx.gateway
            .complete(intent.checkout_id.as_deref().unwrap(), "TXN1", 100_000);

        let settled = wait_for_terminal(&fx, intent.id).await;
        assert_eq!(settled.status, IntentStatus::Success);
        assert_eq!(settled.credits, Some(1000));
        assert_eq!(fx.ledger.balance(account).unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_push_times_out() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");

        let intent = fx
            .engine
            .initiate(account, 100_000, "254712345678")
            .await
            .unwrap();

        let settled = wait_for_terminal(&fx, intent.id).await;
        assert_eq!(settled.status, IntentStatus::Timeout);
        assert_eq!(fx.ledger.balance(account).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_cancelled_by_payer() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");

        let intent = fx
            .engine
            .initiate(account, 100_000, "254712345678")
            .await
            .unwrap();
        fx.gateway.fail(
            intent.checkout_id.as_deref().unwrap(),
            RESULT_CANCELLED,
            "cancelled by user",
        );

        let settled = wait_for_terminal(&fx, intent.id).await;
        assert_eq!(settled.status, IntentStatus::Cancelled);
        assert_eq!(fx.ledger.balance(account).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_initiate_rejects_bad_input() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");

        assert!(matches!(
            fx.engine.initiate(account, 0, "254712345678").await,
            Err(ReconError::InvalidAmount(0))
        ));
        assert!(matches!(
            fx.engine.initiate(AccountId::new(), 100, "254712345678").await,
            Err(ReconError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_credits_matched_account() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");

        let outcome = fx.engine.observe_notification(&json!({
            "TransID": "TXN7",
            "TransAmount": "500.00",
            "BillRefNumber": format!("USER-{}", account.as_u64()),
            "MSISDN": "254712345678",
        }));

        assert_eq!(
            outcome,
            NotificationOutcome::Credited {
                account_id: account,
                credits: 500
            }
        );
        assert_eq!(fx.ledger.balance(account).unwrap(), 500);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_credits_once() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");
        let payload = json!({
            "TransID": "TXN7",
            "TransAmount": 500,
            "BillRefNumber": format!("USER-{}", account.as_u64()),
            "MSISDN": "254712345678",
        });

        assert!(matches!(
            fx.engine.observe_notification(&payload),
            NotificationOutcome::Credited { .. }
        ));
        assert_eq!(
            fx.engine.observe_notification(&payload),
            NotificationOutcome::Duplicate
        );
        assert_eq!(fx.ledger.balance(account).unwrap(), 500);
    }

    #[tokio::test]
    async fn test_unmatched_payment_held_without_credit() {
        let fx = fixture();
        add_account(&fx, "a@example.com", "254712345678");

        let outcome = fx.engine.observe_notification(&json!({
            "TransID": "TXN8",
            "TransAmount": 300,
            "BillRefNumber": "no idea",
            "MSISDN": "254700000001",
        }));
        assert_eq!(outcome, NotificationOutcome::Unmatched);

        let unmatched = fx.storage.unmatched_intents();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].account_id, None);
        assert_eq!(unmatched[0].status, IntentStatus::Success);
    }

    #[tokio::test]
    async fn test_malformed_webhook() {
        let fx = fixture();
        assert_eq!(
            fx.engine.observe_notification(&json!({"hello": "world"})),
            NotificationOutcome::Malformed
        );
        // Success-shaped but no amount.
        assert_eq!(
            fx.engine.observe_notification(&json!({"TransID": "TXN9"})),
            NotificationOutcome::Malformed
        );
    }

    #[tokio::test]
    async fn test_webhook_resolves_push_before_poller() {
        let fx = fixture();
        let account = add_account(&fx, "a@example.com", "254712345678");

        let intent = fx
            .engine
            .initiate(account, 100_000, "254712345678")
            .await
            .unwrap();

        let outcome = fx.engine.observe_notification(&json!({
            "CheckoutRequestID": intent.checkout_id.as_deref().unwrap(),
            "ResultCode": 0,
            "MpesaReceiptNumber": "TXN10",
            "Amount": 1000,
        }));
        assert!(matches!(outcome, NotificationOutcome::Credited { .. }));
        assert_eq!(fx.ledger.balance(account).unwrap(), 1000);

        // The poller sees the terminal intent and stands down; balance stays.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fx.ledger.balance(account).unwrap(), 1000);
    }
}
