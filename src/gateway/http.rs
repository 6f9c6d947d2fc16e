//! HTTP gateway clients.
//!
//! Thin reqwest wrappers; protocol details (auth schemes, signatures) stay
//! out of the core. Timeouts and connection failures are normalized into
//! [`GatewayError`] so callers never branch on transport specifics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PaymentsConfig, SmsGatewayConfig};

use super::{
    GatewayAccept, GatewayError, MobileMoneyGateway, OutboundSms, PushAccept, PushStatus,
    SmsGateway,
};

fn normalize(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

// =============================================================================
// SMS gateway
// =============================================================================

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    message: &'a str,
    sender_id: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    success: bool,
    message_id: Option<String>,
    error: Option<String>,
}

/// HTTP SMS gateway client.
pub struct HttpSmsGateway {
    config: SmsGatewayConfig,
    client: reqwest::Client,
}

impl HttpSmsGateway {
    pub fn new(config: SmsGatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, message: &OutboundSms) -> Result<GatewayAccept, GatewayError> {
        let request = SendRequest {
            to: &message.recipient,
            message: &message.text,
            sender_id: &message.sender_id,
            api_key: &self.config.api_key,
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(normalize)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                code: status.as_u16() as u32,
                message: format!("http status {status}"),
            });
        }

        let body: SendResponse = response.json().await.map_err(normalize)?;

        if !body.success {
            return Err(GatewayError::Rejected {
                code: 0,
                message: body.error.unwrap_or_else(|| "send rejected".to_string()),
            });
        }

        let external_id = body.message_id.ok_or_else(|| GatewayError::Rejected {
            code: 0,
            message: "accepted without a message id".to_string(),
        })?;

        debug!(external_id = %external_id, "sms accepted by gateway");

        Ok(GatewayAccept { external_id })
    }
}

// =============================================================================
// Mobile-money gateway
// =============================================================================

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    phone: &'a str,
    amount: i64,
    reference: &'a str,
    callback_url: &'a str,
    shortcode: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    checkout_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    /// Unset while the payer has not acted
    result_code: Option<u32>,
    transaction_id: Option<String>,
    amount: Option<i64>,
    description: Option<String>,
}

/// HTTP mobile-money gateway client.
pub struct HttpMoneyGateway {
    config: PaymentsConfig,
    client: reqwest::Client,
}

impl HttpMoneyGateway {
    pub fn new(config: PaymentsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.query_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl MobileMoneyGateway for HttpMoneyGateway {
    async fn initiate_push(
        &self,
        phone: &str,
        amount: i64,
        reference: &str,
        callback_url: &str,
    ) -> Result<PushAccept, GatewayError> {
        let request = PushRequest {
            phone,
            amount,
            reference,
            callback_url,
            shortcode: &self.config.shortcode,
            api_key: &self.config.api_key,
        };

        let response = self
            .client
            .post(format!("{}/push", self.config.url))
            .json(&request)
            .send()
            .await
            .map_err(normalize)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                code: status.as_u16() as u32,
                message: format!("http status {status}"),
            });
        }

        let body: PushResponse = response.json().await.map_err(normalize)?;

        debug!(checkout_id = %body.checkout_id, "push payment initiated");

        Ok(PushAccept {
            checkout_id: body.checkout_id,
        })
    }

    async fn query_status(&self, checkout_id: &str) -> Result<PushStatus, GatewayError> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.config.url, checkout_id))
            .send()
            .await
            .map_err(normalize)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                code: status.as_u16() as u32,
                message: format!("http status {status}"),
            });
        }

        let body: StatusResponse = response.json().await.map_err(normalize)?;

        match body.result_code {
            None => Ok(PushStatus::Pending),
            Some(0) => {
                let transaction_id =
                    body.transaction_id.ok_or_else(|| GatewayError::Rejected {
                        code: 0,
                        message: "success without a transaction id".to_string(),
                    })?;
                Ok(PushStatus::Success {
                    transaction_id,
                    amount: body.amount.unwrap_or(0),
                })
            }
            Some(code) => Ok(PushStatus::Failed {
                code,
                description: body
                    .description
                    .unwrap_or_else(|| format!("result code {code}")),
            }),
        }
    }
}
