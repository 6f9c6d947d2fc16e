//! Process wiring and lifecycle.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use crate::api;
use crate::config::Config;
use crate::dispatch::{self, DispatchPipeline, DispatchWorker};
use crate::gateway::{money_gateway_from_config, sms_gateway_from_config};
use crate::ledger::Ledger;
use crate::recon::ReconEngine;
use crate::store::{MemoryStorage, SharedStorage};
use crate::telemetry::init_metrics;

use super::{AppState, Shutdown};

/// The assembled server: storage, ledger, pipeline, engine and API, wired
/// and ready to run.
pub struct Server {
    config: Config,
    state: Arc<AppState>,
    worker: DispatchWorker,
}

impl Server {
    pub async fn new(config: Config, config_path: PathBuf) -> Result<Self> {
        init_metrics().context("failed to initialize metrics")?;

        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let ledger = Arc::new(Ledger::new(storage.clone()));
        let pricing = Arc::new(RwLock::new(config.pricing.clone()));
        let shutdown = Arc::new(Shutdown::new());

        let sms_gateway = sms_gateway_from_config(&config.sms_gateway);
        let money_gateway = money_gateway_from_config(&config.payments);

        let (queue_tx, queue_rx) = mpsc::channel(config.dispatch.queue_depth);
        let pipeline = Arc::new(DispatchPipeline::new(
            storage.clone(),
            ledger.clone(),
            pricing.clone(),
            queue_tx,
            config.sms_gateway.default_sender_id.clone(),
        ));
        let recon = Arc::new(ReconEngine::new(
            storage.clone(),
            ledger.clone(),
            money_gateway,
            pricing.clone(),
            config.payments.clone(),
        ));

        let worker = DispatchWorker::new(
            storage.clone(),
            ledger.clone(),
            sms_gateway,
            queue_rx,
            shutdown.subscribe(),
            config.dispatch.concurrency,
            config.sms_gateway.send_timeout,
        );

        let state = Arc::new(AppState::new(
            storage,
            ledger,
            pipeline,
            recon,
            pricing,
            shutdown,
            config_path,
        ));

        Ok(Self {
            config,
            state,
            worker,
        })
    }

    /// Handle to the shared state, used by integration tests.
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run until SIGINT/SIGTERM. Settles the dispatch queue before exiting.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();

        let worker_handle = tokio::spawn(self.worker.run());
        tokio::spawn(dispatch::run_sweeper(
            self.state.storage.clone(),
            self.state.ledger.clone(),
            self.config.dispatch.clone(),
            shutdown.subscribe(),
        ));

        let router = api::build_router(self.state.clone());
        let listener = TcpListener::bind(self.config.api.address)
            .await
            .with_context(|| format!("failed to bind {}", self.config.api.address))?;
        info!(address = %self.config.api.address, "API server listening");
        self.state.set_ready(true);

        let signal_shutdown = shutdown.clone();
        let mut serve_rx = shutdown.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupt received, shutting down");
                        signal_shutdown.trigger();
                    }
                    _ = serve_rx.changed() => {}
                }
            })
            .await
            .context("API server failed")?;

        // Let the worker drain queued reservations to refunds.
        shutdown.trigger();
        let _ = worker_handle.await;
        info!("shutdown complete");
        Ok(())
    }
}
