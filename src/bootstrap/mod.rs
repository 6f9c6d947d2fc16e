//! Process assembly: shared state, shutdown signaling and the server.

pub mod server;
pub mod shutdown;
pub mod state;

pub use server::Server;
pub use shutdown::Shutdown;
pub use state::{AppState, ReloadResult};
