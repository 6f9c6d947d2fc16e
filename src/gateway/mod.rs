//! External gateway contracts.
//!
//! The dispatch pipeline and the reconciliation engine only ever see these
//! traits. HTTP implementations live in [`http`]; configurable mocks (used
//! by tests and by mock-mode deployments) live in [`mock`]. Which one a
//! component gets is decided at construction from config.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{PaymentsConfig, SmsGatewayConfig};

/// Errors from an external gateway. The dispatch pipeline treats all of
/// them identically: refund path.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Unavailable(String),

    #[error("gateway rejected request: code={code}, {message}")]
    Rejected { code: u32, message: String },

    #[error("gateway timed out")]
    Timeout,
}

/// An outbound message handed to the SMS gateway.
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub recipient: String,
    pub text: String,
    pub sender_id: String,
}

/// Gateway acceptance of a send: the externally assigned send id.
#[derive(Debug, Clone)]
pub struct GatewayAccept {
    pub external_id: String,
}

/// The external SMS gateway.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, message: &OutboundSms) -> Result<GatewayAccept, GatewayError>;
}

/// Gateway acceptance of a push-payment prompt.
#[derive(Debug, Clone)]
pub struct PushAccept {
    pub checkout_id: String,
}

/// Status of a push payment as reported by the gateway.
#[derive(Debug, Clone)]
pub enum PushStatus {
    /// Payer has not acted yet
    Pending,
    /// Payment completed; carries the settlement transaction id
    Success { transaction_id: String, amount: i64 },
    /// Terminal failure; `code` distinguishes cancelled/timeout/other
    Failed { code: u32, description: String },
}

/// The external mobile-money gateway.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Prompt the payer's device to authorize a payment.
    async fn initiate_push(
        &self,
        phone: &str,
        amount: i64,
        reference: &str,
        callback_url: &str,
    ) -> Result<PushAccept, GatewayError>;

    /// Query the current status of a push payment.
    async fn query_status(&self, checkout_id: &str) -> Result<PushStatus, GatewayError>;
}

/// Build the SMS gateway from config: mock if configured, HTTP otherwise.
pub fn sms_gateway_from_config(config: &SmsGatewayConfig) -> Arc<dyn SmsGateway> {
    match config.mock {
        Some(ref mock) => Arc::new(mock::MockSmsGateway::from_config(mock.clone())),
        None => Arc::new(http::HttpSmsGateway::new(config.clone())),
    }
}

/// Build the mobile-money gateway from config.
pub fn money_gateway_from_config(config: &PaymentsConfig) -> Arc<dyn MobileMoneyGateway> {
    match config.mock {
        Some(ref mock) => Arc::new(mock::MockMoneyGateway::from_config(mock.clone())),
        None => Arc::new(http::HttpMoneyGateway::new(config.clone())),
    }
}
