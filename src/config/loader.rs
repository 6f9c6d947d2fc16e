use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pricing.credits_per_segment <= 0 {
            anyhow::bail!("pricing.credits_per_segment must be positive");
        }

        if self.pricing.amount_per_credit <= 0 {
            anyhow::bail!("pricing.amount_per_credit must be positive");
        }

        if self.pricing.max_segments == 0 {
            anyhow::bail!("pricing.max_segments must be at least 1");
        }

        if self.dispatch.queue_depth == 0 {
            anyhow::bail!("dispatch.queue_depth must be at least 1");
        }

        if self.dispatch.concurrency == 0 {
            anyhow::bail!("dispatch.concurrency must be at least 1");
        }

        if self.payments.poll_max_attempts == 0 {
            anyhow::bail!("payments.poll_max_attempts must be at least 1");
        }

        if self.sms_gateway.mock.is_none() && self.sms_gateway.url.is_empty() {
            anyhow::bail!("sms_gateway.url must be set when not in mock mode");
        }

        if self.payments.mock.is_none() && self.payments.url.is_empty() {
            anyhow::bail!("payments.url must be set when not in mock mode");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.pricing.credits_per_segment, 1);
        assert_eq!(config.dispatch.queue_depth, 1024);
        assert_eq!(config.payments.poll_max_attempts, 12);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
api:
  address: "127.0.0.1:8088"
sms_gateway:
  url: "https://sms.example.com/send"
  api_key: "key"
  default_sender_id: "ACME"
  send_timeout: "10s"
payments:
  url: "https://pay.example.com"
  shortcode: "174379"
  callback_url: "https://acme.example.com/payments/confirmation"
  poll_interval: "2s"
  poll_max_attempts: 5
pricing:
  credits_per_segment: 1
  amount_per_credit: 100
  max_segments: 6
dispatch:
  queue_depth: 64
  concurrency: 8
  stuck_after: "5m"
settings:
  log_level: "debug"
  json_logs: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.api.address.port(), 8088);
        assert_eq!(config.pricing.max_segments, 6);
        assert_eq!(config.dispatch.concurrency, 8);
        assert_eq!(config.payments.poll_max_attempts, 5);
        assert!(config.settings.json_logs);
    }

    #[test]
    fn test_rejects_zero_segments() {
        let err = Config::from_yaml("pricing: { max_segments: 0 }").unwrap_err();
        assert!(err.to_string().contains("max_segments"));
    }

    #[test]
    fn test_rejects_zero_queue_depth() {
        let err = Config::from_yaml("dispatch: { queue_depth: 0 }").unwrap_err();
        assert!(err.to_string().contains("queue_depth"));
    }
}
