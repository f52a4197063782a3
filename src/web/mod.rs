//! HTTP surface: provider webhooks, the case retry endpoint, manual
//! monitoring runs and a health check.

pub mod server;
pub mod types;

pub use server::{AppState, retry_error_status, router, start_server, webhook_error_status};
