//! Queue worker: the only component that talks to the SMS gateway.
//!
//! Pulls jobs off the bounded queue and settles each reservation exactly
//! once. Gateway acceptance captures; rejection, unreachability or a send
//! timeout refunds. On shutdown the remaining queue is drained straight to
//! refunds so no reservation is left dangling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::gateway::{GatewayError, OutboundSms, SmsGateway};
use crate::ledger::{Ledger, RefundOutcome};
use crate::store::{DispatchId, DispatchRecord, DispatchStatus, SharedStorage};
use crate::telemetry::counters;

/// A queued send, identified by its dispatch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchJob {
    pub id: DispatchId,
}

struct JobContext {
    storage: SharedStorage,
    ledger: Arc<Ledger>,
    gateway: Arc<dyn SmsGateway>,
    send_timeout: Duration,
}

/// The dispatch worker loop.
pub struct DispatchWorker {
    ctx: Arc<JobContext>,
    queue: mpsc::Receiver<DispatchJob>,
    shutdown: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
}

impl DispatchWorker {
    pub fn new(
        storage: SharedStorage,
        ledger: Arc<Ledger>,
        gateway: Arc<dyn SmsGateway>,
        queue: mpsc::Receiver<DispatchJob>,
        shutdown: watch::Receiver<bool>,
        concurrency: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            ctx: Arc::new(JobContext {
                storage,
                ledger,
                gateway,
                send_timeout,
            }),
            queue,
            shutdown,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    pub async fn run(mut self) {
        info!("dispatch worker started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }

                job = self.queue.recv() => {
                    let Some(job) = job else { break };
                    let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        process(&ctx, job).await;
                        drop(permit);
                    });
                }
            }
        }

        // Reservations behind still-queued jobs go back to their accounts.
        let mut drained = 0usize;
        while let Ok(job) = self.queue.try_recv() {
            settle_failure(&self.ctx, job.id, None, "shutting down");
            drained += 1;
        }
        info!(drained, "dispatch worker stopped");
    }
}

#[tracing::instrument(skip(ctx), fields(message = %job.id))]
async fn process(ctx: &JobContext, job: DispatchJob) {
    let Some(record) = ctx.storage.get_dispatch(job.id) else {
        warn!(message = %job.id, "queued job has no dispatch record");
        return;
    };
    // Already settled (e.g. swept while queued).
    if record.status != DispatchStatus::Queued {
        debug!(message = %job.id, status = record.status.name(), "skipping settled job");
        return;
    }

    let message = OutboundSms {
        recipient: record.recipient.clone(),
        text: record.text.clone(),
        sender_id: record.sender_id.clone(),
    };

    match tokio::time::timeout(ctx.send_timeout, ctx.gateway.send(&message)).await {
        Ok(Ok(accept)) => settle_success(ctx, &record, &accept.external_id),
        Ok(Err(GatewayError::Rejected { code, message })) => {
            settle_failure(ctx, record.id, Some(code), &message);
        }
        Ok(Err(err)) => settle_failure(ctx, record.id, None, &err.to_string()),
        Err(_) => settle_failure(ctx, record.id, None, "gateway send timed out"),
    }
}

fn settle_success(ctx: &JobContext, record: &DispatchRecord, external_id: &str) {
    let correlation = record.id.to_string();
    match ctx.ledger.capture(&correlation) {
        Ok(crate::ledger::CaptureOutcome::AlreadyRefunded) => {
            // The sweeper got there first; the record is already failed.
            warn!(message = %record.id, "gateway accepted a swept message");
            return;
        }
        Ok(_) => {}
        Err(err) => {
            warn!(message = %record.id, error = %err, "capture failed");
            return;
        }
    }

    let external = external_id.to_string();
    ctx.storage
        .update_dispatch(record.id, Box::new(move |r| r.mark_sent(external)));
    counters::sms_sent();
    debug!(message = %record.id, external_id, "message sent");
}

fn settle_failure(ctx: &JobContext, id: DispatchId, code: Option<u32>, reason: &str) {
    let correlation = id.to_string();
    match ctx.ledger.refund(&correlation, reason) {
        Ok(RefundOutcome::Refunded(entry)) => counters::credits_refunded(entry.delta),
        Ok(_) => {}
        Err(err) => warn!(message = %id, error = %err, "refund failed"),
    }

    let detail = reason.to_string();
    ctx.storage
        .update_dispatch(id, Box::new(move |r| r.mark_failed(code, detail)));
    counters::sms_failed();
    debug!(message = %id, reason, "message failed, reservation refunded");
}
