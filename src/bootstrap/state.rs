//! Shared application state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::bootstrap::Shutdown;
use crate::config::Config;
use crate::dispatch::DispatchPipeline;
use crate::ledger::Ledger;
use crate::pricing::PricingPolicy;
use crate::recon::ReconEngine;
use crate::store::SharedStorage;
use crate::telemetry::counters;

/// Everything the API handlers touch. One per process.
pub struct AppState {
    pub storage: SharedStorage,
    pub ledger: Arc<Ledger>,
    pub pipeline: Arc<DispatchPipeline>,
    pub recon: Arc<ReconEngine>,
    /// Swapped whole on config reload; readers see old or new, never a mix
    pub pricing: Arc<RwLock<PricingPolicy>>,
    pub shutdown: Arc<Shutdown>,
    config_path: PathBuf,
    start_time: Instant,
    healthy: AtomicBool,
    ready: AtomicBool,
    reload_count: AtomicU64,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: SharedStorage,
        ledger: Arc<Ledger>,
        pipeline: Arc<DispatchPipeline>,
        recon: Arc<ReconEngine>,
        pricing: Arc<RwLock<PricingPolicy>>,
        shutdown: Arc<Shutdown>,
        config_path: PathBuf,
    ) -> Self {
        Self {
            storage,
            ledger,
            pipeline,
            recon,
            pricing,
            shutdown,
            config_path,
            start_time: Instant::now(),
            healthy: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            reload_count: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    /// Reload the config file and swap the pricing policy.
    ///
    /// Pricing is the only hot-swappable section. Gateway endpoints, queue
    /// sizing and bind addresses are wired at startup and need a restart.
    pub fn reload_config(&self) -> Result<ReloadResult, String> {
        info!(path = %self.config_path.display(), "reloading configuration via admin API");

        let new_config = Config::load(&self.config_path)
            .map_err(|e| format!("failed to load config: {e}"))?;

        {
            let mut pricing = self.pricing.write().unwrap();
            *pricing = new_config.pricing.clone();
        }

        let count = self.reload_count.fetch_add(1, Ordering::Relaxed) + 1;
        counters::config_reloaded();

        info!(
            credits_per_segment = new_config.pricing.credits_per_segment,
            amount_per_credit = new_config.pricing.amount_per_credit,
            max_segments = new_config.pricing.max_segments,
            reload_count = count,
            "pricing policy reloaded"
        );

        Ok(ReloadResult {
            success: true,
            message: "pricing policy reloaded".to_string(),
            reload_count: count,
        })
    }
}

/// Result of a config reload operation.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResult {
    pub success: bool,
    pub message: String,
    pub reload_count: u64,
}
