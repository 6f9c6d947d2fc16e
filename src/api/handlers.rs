//! HTTP API handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bootstrap::AppState;
use crate::dispatch::{DispatchError, SendRequest};
use crate::recon::ReconError;
use crate::store::{Account, AccountId, DispatchId, DispatchRecord, IntentId, PaymentIntent};
use crate::telemetry::{counters, encode_metrics};

/// Uniform error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

// =============================================================================
// SMS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub account_id: String,
    pub to: String,
    pub message: String,
    #[serde(default)]
    pub sender_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub message_id: String,
    pub status: &'static str,
    pub segments: u32,
    pub credits_charged: i64,
    pub new_balance: i64,
}

/// POST /v1/sms/send
pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendBody>,
) -> impl IntoResponse {
    let Ok(account_id) = AccountId::from_str(&body.account_id) else {
        return error(StatusCode::BAD_REQUEST, "invalid account id").into_response();
    };

    let request = SendRequest {
        account_id,
        recipient: body.to,
        text: body.message,
        sender_id: body.sender_id,
    };

    match state.pipeline.submit(request) {
        Ok(accepted) => (
            StatusCode::OK,
            Json(SendResponse {
                message_id: accepted.message_id.to_string(),
                status: accepted.status,
                segments: accepted.segments,
                credits_charged: accepted.credits_charged,
                new_balance: accepted.new_balance,
            }),
        )
            .into_response(),
        Err(err) => {
            let status = match &err {
                DispatchError::InvalidRecipient(_) | DispatchError::InvalidMessage(_) => {
                    StatusCode::BAD_REQUEST
                }
                DispatchError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                DispatchError::AccountSuspended(_) => StatusCode::FORBIDDEN,
                DispatchError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                DispatchError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            };
            error(status, err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SmsStatusResponse {
    pub message_id: String,
    pub account_id: String,
    pub status: &'static str,
    pub segments: u32,
    pub credits: i64,
    pub refunded: bool,
    pub external_id: Option<String>,
    pub error_code: Option<u32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<DispatchRecord> for SmsStatusResponse {
    fn from(r: DispatchRecord) -> Self {
        Self {
            message_id: r.id.to_string(),
            account_id: r.account_id.to_string(),
            status: r.status.name(),
            segments: r.segments,
            credits: r.credits,
            refunded: r.refunded,
            external_id: r.external_id,
            error_code: r.error_code,
            error: r.error,
            created_at: r.created_at,
            sent_at: r.sent_at,
            delivered_at: r.delivered_at,
            failed_at: r.failed_at,
        }
    }
}

/// GET /v1/sms/{id}
pub async fn sms_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = DispatchId::from_str(&id) else {
        return error(StatusCode::BAD_REQUEST, "invalid message id").into_response();
    };
    match state.storage.get_dispatch(id) {
        Some(record) => Json(SmsStatusResponse::from(record)).into_response(),
        None => error(StatusCode::NOT_FOUND, "message not found").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DlrBody {
    pub external_id: String,
    pub status: String,
}

/// POST /v1/sms/dlr
///
/// Gateway delivery report. Only `delivered` moves the record; anything else
/// is logged and acked, since the refund decision was already made at send
/// time.
pub async fn dlr_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DlrBody>,
) -> impl IntoResponse {
    let Some(record) = state.storage.dispatch_by_external_id(&body.external_id) else {
        return error(StatusCode::NOT_FOUND, "unknown external id").into_response();
    };

    if body.status.eq_ignore_ascii_case("delivered") {
        state
            .storage
            .update_dispatch(record.id, Box::new(|r| r.mark_delivered()));
        info!(message = %record.id, external_id = %body.external_id, "delivery confirmed");
    } else {
        info!(
            message = %record.id,
            status = %body.status,
            "non-delivered DLR ignored"
        );
    }
    StatusCode::OK.into_response()
}

// =============================================================================
// Top-ups
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TopupBody {
    pub account_id: String,
    /// Amount in minor currency units
    pub amount: i64,
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct TopupResponse {
    pub intent_id: String,
    pub checkout_id: Option<String>,
    pub status: &'static str,
}

/// POST /v1/topup/initiate
pub async fn topup_initiate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TopupBody>,
) -> impl IntoResponse {
    let Ok(account_id) = AccountId::from_str(&body.account_id) else {
        return error(StatusCode::BAD_REQUEST, "invalid account id").into_response();
    };

    match state.recon.initiate(account_id, body.amount, &body.phone).await {
        Ok(intent) => (
            StatusCode::ACCEPTED,
            Json(TopupResponse {
                intent_id: intent.id.to_string(),
                checkout_id: intent.checkout_id,
                status: "pending",
            }),
        )
            .into_response(),
        Err(err) => {
            let status = match &err {
                ReconError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                ReconError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                ReconError::Gateway(_) => StatusCode::BAD_GATEWAY,
            };
            error(status, err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TopupStatusQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct TopupStatusResponse {
    pub intent_id: String,
    pub status: &'static str,
    pub amount: i64,
    pub credits: Option<i64>,
    pub message: Option<String>,
}

/// GET /v1/topup/status?id=pay_1
pub async fn topup_status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopupStatusQuery>,
) -> impl IntoResponse {
    let Ok(id) = IntentId::from_str(&query.id) else {
        return error(StatusCode::BAD_REQUEST, "invalid intent id").into_response();
    };
    match state.storage.get_intent(id) {
        Some(intent) => Json(TopupStatusResponse {
            intent_id: intent.id.to_string(),
            status: intent.status.name(),
            amount: intent.amount,
            credits: intent.credits,
            message: intent.detail,
        })
        .into_response(),
        None => error(StatusCode::NOT_FOUND, "intent not found").into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    #[serde(rename = "ResultCode")]
    pub result_code: u32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

/// POST /payments/confirmation
///
/// The gateway retries anything that isn't an ack, so this endpoint
/// swallows every payload and always returns `ResultCode: 0`. Outcomes are
/// reported through logs and metrics.
pub async fn payment_webhook_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => {
            let outcome = state.recon.observe_notification(&payload);
            info!(?outcome, "payment notification processed");
        }
        Err(err) => {
            counters::payment_notification();
            counters::payment_malformed();
            warn!(error = %err, "unparseable payment notification");
        }
    }

    Json(WebhookAck {
        result_code: 0,
        result_desc: "Accepted",
    })
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountBody {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Opening balance, granted as a seed ledger entry
    #[serde(default)]
    pub initial_credits: i64,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub balance: i64,
    pub status: &'static str,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            account_id: a.id.to_string(),
            email: a.email,
            phone: a.phone,
            balance: a.balance,
            status: a.status.name(),
        }
    }
}

/// POST /admin/accounts
pub async fn create_account_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAccountBody>,
) -> impl IntoResponse {
    if body.initial_credits < 0 {
        return error(StatusCode::BAD_REQUEST, "initial_credits must be >= 0").into_response();
    }

    let phone = body
        .phone
        .as_deref()
        .map(|p| crate::recon::normalize_msisdn(p).unwrap_or_else(|| p.to_string()));
    let account = Account::new(body.email, phone);
    let id = state.storage.insert_account(account);

    if body.initial_credits > 0 {
        let reference = format!("seed_{id}");
        if let Err(err) =
            state
                .ledger
                .credit(id, body.initial_credits, &reference, "opening balance")
        {
            warn!(account = %id, error = %err, "seed credit failed");
        }
    }

    info!(account = %id, credits = body.initial_credits, "account created");
    match state.storage.get_account(id) {
        Some(account) => {
            (StatusCode::CREATED, Json(AccountResponse::from(account))).into_response()
        }
        None => error(StatusCode::INTERNAL_SERVER_ERROR, "account vanished").into_response(),
    }
}

/// GET /admin/accounts/{id}
pub async fn get_account_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = AccountId::from_str(&id) else {
        return error(StatusCode::BAD_REQUEST, "invalid account id").into_response();
    };
    match state.storage.get_account(id) {
        Some(account) => Json(AccountResponse::from(account)).into_response(),
        None => error(StatusCode::NOT_FOUND, "account not found").into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub entry_id: String,
    pub delta: i64,
    pub kind: &'static str,
    pub correlation: Option<String>,
    pub reference: Option<String>,
    pub description: String,
    pub reversed: bool,
    pub created_at: DateTime<Utc>,
}

/// GET /admin/accounts/{id}/ledger
pub async fn account_ledger_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = AccountId::from_str(&id) else {
        return error(StatusCode::BAD_REQUEST, "invalid account id").into_response();
    };
    if state.storage.get_account(id).is_none() {
        return error(StatusCode::NOT_FOUND, "account not found").into_response();
    }

    let entries: Vec<LedgerEntryResponse> = state
        .storage
        .entries_for_account(id)
        .into_iter()
        .map(|e| LedgerEntryResponse {
            entry_id: e.id.to_string(),
            delta: e.delta,
            kind: e.kind.name(),
            correlation: e.correlation,
            reference: e.reference,
            description: e.description,
            reversed: e.status == crate::store::EntryStatus::Reversed,
            created_at: e.created_at,
        })
        .collect();
    Json(entries).into_response()
}

#[derive(Debug, Serialize)]
pub struct UnmatchedPaymentResponse {
    pub intent_id: String,
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub reference: String,
    pub payer_phone: String,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentIntent> for UnmatchedPaymentResponse {
    fn from(i: PaymentIntent) -> Self {
        Self {
            intent_id: i.id.to_string(),
            transaction_id: i.transaction_id,
            amount: i.amount,
            reference: i.reference,
            payer_phone: i.payer_phone,
            created_at: i.created_at,
        }
    }
}

/// GET /admin/payments/unmatched
pub async fn unmatched_payments_handler(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let payments: Vec<UnmatchedPaymentResponse> = state
        .storage
        .unmatched_intents()
        .into_iter()
        .map(UnmatchedPaymentResponse::from)
        .collect();
    Json(payments)
}

/// POST /admin/config/reload
pub async fn reload_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(message) => error(StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
    }
}

// =============================================================================
// Health, stats and metrics
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /healthz
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.is_healthy();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// GET /livez
pub async fn live_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /readyz
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub reload_count: u64,
    pub store: crate::store::StoreStats,
}

/// GET /stats
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatsResponse {
        uptime_seconds: state.uptime().as_secs(),
        reload_count: state.reload_count(),
        store: state.storage.stats(),
    })
}

/// GET /store/stats
pub async fn store_stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.storage.stats())
}

/// GET /metrics (Prometheus text format)
pub async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("error encoding metrics: {e}"),
        ),
    }
}
