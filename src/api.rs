//! HTTP API server.

pub mod server;
pub mod state;

pub use server::start_http_server;
pub use state::ApiState;
