//! Mock gateways.
//!
//! Used in two places: mock-mode deployments (configured responses, for
//! load and integration environments without live gateways) and tests,
//! which drive the programmable hooks directly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::{MockConfig, MockResponse};

use super::{
    GatewayAccept, GatewayError, MobileMoneyGateway, OutboundSms, PushAccept, PushStatus,
    SmsGateway,
};

fn scripted_error(response: &MockResponse) -> Option<GatewayError> {
    match response {
        MockResponse::Success => None,
        MockResponse::Error { code } => Some(GatewayError::Rejected {
            code: *code,
            message: format!("mock error {code}"),
        }),
        MockResponse::Unreachable => {
            Some(GatewayError::Unavailable("mock unreachable".to_string()))
        }
    }
}

/// Mock SMS gateway.
pub struct MockSmsGateway {
    config: MockConfig,
    counter: AtomicU64,
    /// Every message handed to the gateway, for test assertions
    sent: Mutex<Vec<OutboundSms>>,
}

impl MockSmsGateway {
    pub fn from_config(config: MockConfig) -> Self {
        Self {
            config,
            counter: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn always_success() -> Self {
        Self::from_config(MockConfig {
            response: MockResponse::Success,
            latency: std::time::Duration::ZERO,
        })
    }

    pub fn always_error(code: u32) -> Self {
        Self::from_config(MockConfig {
            response: MockResponse::Error { code },
            latency: std::time::Duration::ZERO,
        })
    }

    pub fn unreachable() -> Self {
        Self::from_config(MockConfig {
            response: MockResponse::Unreachable,
            latency: std::time::Duration::ZERO,
        })
    }

    /// Messages accepted or attempted so far.
    pub fn sent_messages(&self) -> Vec<OutboundSms> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsGateway for MockSmsGateway {
    async fn send(&self, message: &OutboundSms) -> Result<GatewayAccept, GatewayError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        self.sent.lock().unwrap().push(message.clone());

        if let Some(err) = scripted_error(&self.config.response) {
            return Err(err);
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(GatewayAccept {
            external_id: format!("MOCK-{n}"),
        })
    }
}

/// Mock mobile-money gateway.
///
/// `initiate_push` hands out checkout ids; tests move a checkout to a
/// terminal status via [`MockMoneyGateway::complete`] / [`fail`] and the
/// poller observes it on its next query.
///
/// [`fail`]: MockMoneyGateway::fail
pub struct MockMoneyGateway {
    config: MockConfig,
    counter: AtomicU64,
    statuses: Mutex<HashMap<String, PushStatus>>,
}

impl MockMoneyGateway {
    pub fn from_config(config: MockConfig) -> Self {
        Self {
            config,
            counter: AtomicU64::new(1),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending() -> Self {
        Self::from_config(MockConfig {
            response: MockResponse::Success,
            latency: std::time::Duration::ZERO,
        })
    }

    /// Script a checkout to report success on the next query.
    pub fn complete(&self, checkout_id: &str, transaction_id: &str, amount: i64) {
        self.statuses.lock().unwrap().insert(
            checkout_id.to_string(),
            PushStatus::Success {
                transaction_id: transaction_id.to_string(),
                amount,
            },
        );
    }

    /// Script a checkout to report a terminal failure on the next query.
    pub fn fail(&self, checkout_id: &str, code: u32, description: &str) {
        self.statuses.lock().unwrap().insert(
            checkout_id.to_string(),
            PushStatus::Failed {
                code,
                description: description.to_string(),
            },
        );
    }
}

#[async_trait]
impl MobileMoneyGateway for MockMoneyGateway {
    async fn initiate_push(
        &self,
        _phone: &str,
        _amount: i64,
        _reference: &str,
        _callback_url: &str,
    ) -> Result<PushAccept, GatewayError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if let Some(err) = scripted_error(&self.config.response) {
            return Err(err);
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(PushAccept {
            checkout_id: format!("MOCK-CHK-{n}"),
        })
    }

    async fn query_status(&self, checkout_id: &str) -> Result<PushStatus, GatewayError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(checkout_id)
            .cloned()
            .unwrap_or(PushStatus::Pending))
    }
}
