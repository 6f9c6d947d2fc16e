//! HTTP API: public send/top-up surface, gateway callbacks and admin.

pub mod handlers;
pub mod server;

pub use server::build_router;
