//! HTTP API router.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::bootstrap::AppState;

use super::handlers::{
    account_ledger_handler, create_account_handler, dlr_handler, get_account_handler,
    health_handler, live_handler, metrics_handler, payment_webhook_handler, ready_handler,
    reload_handler, send_handler, sms_status_handler, stats_handler, store_stats_handler,
    topup_initiate_handler, topup_status_handler, unmatched_payments_handler,
};

/// Build the full router: public API, payment webhook, admin and health.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Public API
        .route("/v1/sms/send", post(send_handler))
        .route("/v1/sms/:id", get(sms_status_handler))
        .route("/v1/sms/dlr", post(dlr_handler))
        .route("/v1/topup/initiate", post(topup_initiate_handler))
        .route("/v1/topup/status", get(topup_status_handler))
        // Gateway callbacks
        .route("/payments/confirmation", post(payment_webhook_handler))
        // Admin
        .route("/admin/accounts", post(create_account_handler))
        .route("/admin/accounts/:id", get(get_account_handler))
        .route("/admin/accounts/:id/ledger", get(account_ledger_handler))
        .route("/admin/payments/unmatched", get(unmatched_payments_handler))
        .route("/admin/config/reload", post(reload_handler))
        // Kubernetes-style health endpoints
        .route("/healthz", get(health_handler))
        .route("/livez", get(live_handler))
        .route("/readyz", get(ready_handler))
        // Metrics and stats
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/store/stats", get(store_stats_handler))
        .with_state(state)
}
