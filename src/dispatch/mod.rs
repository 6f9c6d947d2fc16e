//! Message dispatch.
//!
//! The reserve/send/settle flow: [`pipeline`] validates and prices a send,
//! debits the reservation and queues a job; [`worker`] drains the queue,
//! talks to the SMS gateway and settles each reservation as a capture or a
//! refund; [`sweeper`] refunds records that sat queued past the staleness
//! cutoff. Every reservation resolves to exactly one of capture or refund.

pub mod pipeline;
pub mod sweeper;
pub mod worker;

pub use pipeline::{DispatchError, DispatchPipeline, SendAccepted, SendRequest};
pub use sweeper::run_sweeper;
pub use worker::{DispatchJob, DispatchWorker};
