use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::pricing::PricingPolicy;

/// Root configuration for smsbilld
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Public + admin HTTP API
    #[serde(default)]
    pub api: ApiConfig,

    /// Outbound SMS gateway
    #[serde(default)]
    pub sms_gateway: SmsGatewayConfig,

    /// Mobile-money gateway (push payments and inbound notifications)
    #[serde(default)]
    pub payments: PaymentsConfig,

    /// Pricing policy (segments -> credits, amount -> credits)
    #[serde(default)]
    pub pricing: PricingPolicy,

    /// Dispatch pipeline tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_api_address")]
    pub address: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_api_address(),
        }
    }
}

fn default_api_address() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// SMS gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SmsGatewayConfig {
    /// Gateway endpoint URL
    #[serde(default = "default_sms_url")]
    pub url: String,

    /// API credentials sent with each request
    #[serde(default)]
    pub api_key: String,

    /// Default sender ID when the request carries none
    #[serde(default = "default_sender_id")]
    pub default_sender_id: String,

    /// Per-send timeout (any overrun takes the refund path)
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,

    /// Mock mode - return configured responses instead of calling out
    #[serde(default)]
    pub mock: Option<MockConfig>,
}

impl Default for SmsGatewayConfig {
    fn default() -> Self {
        Self {
            url: default_sms_url(),
            api_key: String::new(),
            default_sender_id: default_sender_id(),
            send_timeout: default_send_timeout(),
            mock: None,
        }
    }
}

fn default_sms_url() -> String {
    "http://localhost:9000/send".to_string()
}

fn default_sender_id() -> String {
    "SMSBILL".to_string()
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Mobile-money gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Gateway base URL
    #[serde(default = "default_payments_url")]
    pub url: String,

    /// Merchant shortcode / till number
    #[serde(default)]
    pub shortcode: String,

    /// API credentials
    #[serde(default)]
    pub api_key: String,

    /// Public URL the gateway delivers confirmations to
    #[serde(default = "default_callback_url")]
    pub callback_url: String,

    /// Push status poll interval
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum poll attempts before an intent times out
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Per-query timeout against the gateway
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Mock mode - return configured responses instead of calling out
    #[serde(default)]
    pub mock: Option<MockConfig>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            url: default_payments_url(),
            shortcode: String::new(),
            api_key: String::new(),
            callback_url: default_callback_url(),
            poll_interval: default_poll_interval(),
            poll_max_attempts: default_poll_max_attempts(),
            query_timeout: default_query_timeout(),
            mock: None,
        }
    }
}

fn default_payments_url() -> String {
    "http://localhost:9100".to_string()
}

fn default_callback_url() -> String {
    "http://localhost:8080/payments/confirmation".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_max_attempts() -> u32 {
    12
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Mock response configuration for gateways
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    /// Response type
    #[serde(default)]
    pub response: MockResponse,

    /// Simulated latency
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
}

/// Mock response type
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockResponse {
    #[default]
    Success,
    Error {
        code: u32,
    },
    Unreachable,
}

/// Dispatch pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Bounded queue depth between the request path and the worker
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Concurrent gateway submissions
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Sweep interval for stuck queued records
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Age after which a still-queued record is resolved via refund
    #[serde(default = "default_stuck_after", with = "humantime_serde")]
    pub stuck_after: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            concurrency: default_concurrency(),
            sweep_interval: default_sweep_interval(),
            stuck_after: default_stuck_after(),
        }
    }
}

fn default_queue_depth() -> usize {
    1024
}

fn default_concurrency() -> usize {
    32
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_stuck_after() -> Duration {
    Duration::from_secs(600)
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Enable structured JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Humantime serde support module
pub(crate) mod humantime_serde {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
