//! smsbilld - transactional spine of a prepaid SMS platform.
//!
//! Customers hold a prepaid credit balance, spend credits per outbound
//! message, and top up via mobile-money payments. The modules here cover the
//! parts that must guarantee exactly-once effect on a monetary balance:
//!
//! - [`ledger`]: append-only credit ledger with reserve/capture/refund/credit
//! - [`dispatch`]: debit-first send pipeline with async gateway submission
//! - [`recon`]: payment reconciliation (dedupe, account match, top-up)
//! - [`pricing`]: pure segment counting and credit pricing
//!
//! Everything else is plumbing: [`store`] owns state, [`gateway`] talks to
//! the outside world, [`api`] exposes the HTTP surface, [`bootstrap`] wires
//! it together.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod ledger;
pub mod pricing;
pub mod recon;
pub mod store;
pub mod telemetry;
