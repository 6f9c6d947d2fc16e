//! Shared integration-test fixtures.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use smsbilld::bootstrap::{AppState, Server};
use smsbilld::config::Config;

/// Port allocator for tests
static PORT: AtomicU16 = AtomicU16::new(19200);

pub fn next_port() -> u16 {
    PORT.fetch_add(1, Ordering::SeqCst)
}

pub struct TestApp {
    pub base: String,
    pub state: Arc<AppState>,
    pub client: reqwest::Client,
    pub config_path: PathBuf,
}

/// Boot a full server on a fresh port with mock gateways. `extra_yaml` holds
/// additional top-level config sections.
pub async fn spawn_app(extra_yaml: &str) -> TestApp {
    let port = next_port();
    let yaml = format!(
        "api:\n  address: \"127.0.0.1:{port}\"\n\
         sms_gateway:\n  mock:\n    response: success\n\
         payments:\n  poll_interval: 20ms\n  poll_max_attempts: 5\n  mock:\n    response: success\n\
         {extra_yaml}"
    );
    let config_path = std::env::temp_dir().join(format!("smsbilld-test-{port}.yaml"));
    std::fs::write(&config_path, &yaml).expect("write test config");

    let config = Config::load(&config_path).expect("test config is valid");
    let server = Server::new(config, config_path.clone())
        .await
        .expect("server assembles");
    let state = server.state();
    tokio::spawn(server.run());

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");
    for _ in 0..200 {
        if let Ok(resp) = client.get(format!("{base}/readyz")).send().await {
            if resp.status().is_success() {
                return TestApp {
                    base,
                    state,
                    client,
                    config_path,
                };
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never became ready");
}

/// Create an account over the admin API, returning its id.
pub async fn create_account(app: &TestApp, credits: i64) -> String {
    let resp = app
        .client
        .post(format!("{}/admin/accounts", app.base))
        .json(&json!({
            "email": format!("test-{}@example.com", next_port()),
            "initial_credits": credits,
        }))
        .send()
        .await
        .expect("create account");
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let body: serde_json::Value = resp.json().await.expect("account body");
    body["account_id"].as_str().expect("account_id").to_string()
}

/// Current balance, read over the admin API.
pub async fn balance_of(app: &TestApp, account_id: &str) -> i64 {
    let resp = app
        .client
        .get(format!("{}/admin/accounts/{account_id}", app.base))
        .send()
        .await
        .expect("get account");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.expect("account body");
    body["balance"].as_i64().expect("balance")
}
